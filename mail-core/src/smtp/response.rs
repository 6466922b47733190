/// A numeric SMTP reply, possibly spanning several lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
    /// Close the connection once this reply is written
    pub end_session: bool,
}

impl SmtpResponse {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
            end_session: false,
        }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Self {
            code,
            lines,
            end_session: false,
        }
    }

    pub fn ending(mut self) -> Self {
        self.end_session = true;
        self
    }

    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    pub fn bad_sequence() -> Self {
        Self::new(503, "Bad sequence of commands")
    }

    pub fn syntax_error(text: impl Into<String>) -> Self {
        Self::new(501, text)
    }

    pub fn local_error() -> Self {
        Self::new(451, "Requested action aborted: local error in processing")
    }

    /// 5xx replies count against the client's error budget
    pub fn is_permanent_failure(&self) -> bool {
        self.code >= 500
    }

    /// Wire form: `-` after the code on every line but the last
    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            return format!("{}\r\n", self.code);
        }
        let last = self.lines.len() - 1;
        let mut out = String::new();
        for (idx, line) in self.lines.iter().enumerate() {
            let separator = if idx == last { ' ' } else { '-' };
            out.push_str(&format!("{}{}{}\r\n", self.code, separator, line));
        }
        out
    }
}
