use crate::error::{MailError, Result};

/// One SMTP command line split into verb and argument
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpRequest {
    /// Upper-cased verb
    pub command: String,
    pub argument: String,
}

impl SmtpRequest {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(MailError::SmtpProtocol("Empty command".to_string()));
        }

        let (command, argument) = match line.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };

        Ok(Self {
            command: command.to_uppercase(),
            argument: argument.to_string(),
        })
    }

    /// `FROM:<address> [params]` or `TO:<address> [params]`
    ///
    /// The null reverse-path `<>` comes back as an empty string.
    pub fn path(&self, prefix: &str) -> Result<String> {
        let args = self.argument.as_str();
        let rest = match args.get(..prefix.len()) {
            Some(head) if head.eq_ignore_ascii_case(prefix) => args[prefix.len()..].trim_start(),
            _ => {
                return Err(MailError::SmtpProtocol(format!(
                    "Invalid {} {} syntax",
                    self.command, prefix
                )))
            }
        };

        let address = match rest.strip_prefix('<') {
            Some(inner) => inner
                .split_once('>')
                .map(|(address, _)| address)
                .ok_or_else(|| MailError::SmtpProtocol("Unterminated path".to_string()))?,
            None => rest.split_whitespace().next().unwrap_or(""),
        };

        Ok(address.to_string())
    }
}

/// Split `local@domain`; the domain is lower-cased
pub fn split_address(address: &str) -> Option<(&str, String)> {
    let (local, domain) = address.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some((local, domain.to_ascii_lowercase()))
}
