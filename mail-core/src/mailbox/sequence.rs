//! IMAP sequence sets (`1:3,5,7:*`)

use crate::error::{MailError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceBound {
    Number(u32),
    /// `*`: the largest number in use
    Last,
}

impl SequenceBound {
    fn resolve(self, last: u32) -> u32 {
        match self {
            SequenceBound::Number(n) => n,
            SequenceBound::Last => last,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSet {
    ranges: Vec<(SequenceBound, SequenceBound)>,
}

impl SequenceSet {
    pub fn parse(input: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        for part in input.split(',') {
            let range = match part.split_once(':') {
                Some((start, end)) => (Self::parse_bound(start)?, Self::parse_bound(end)?),
                None => {
                    let bound = Self::parse_bound(part)?;
                    (bound, bound)
                }
            };
            ranges.push(range);
        }
        Ok(Self { ranges })
    }

    fn parse_bound(s: &str) -> Result<SequenceBound> {
        if s == "*" {
            return Ok(SequenceBound::Last);
        }
        match s.parse::<u32>() {
            Ok(0) | Err(_) => Err(MailError::syntax(format!("invalid sequence number {:?}", s))),
            Ok(n) => Ok(SequenceBound::Number(n)),
        }
    }

    /// Whether `n` is in the set, with `*` standing for `last`
    pub fn contains(&self, n: u32, last: u32) -> bool {
        self.ranges.iter().any(|(start, end)| {
            let (a, b) = (start.resolve(last), end.resolve(last));
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            low <= n && n <= high
        })
    }
}
