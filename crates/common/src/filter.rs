//! Device filter engine
//!
//! An ordered list of allow/forbid rules is evaluated against each device.
//! The first matching rule decides; a device matched by no rule is dropped.
//!
//! Rule files hold one rule per line:
//!
//! ```text
//! + hid
//! + 1050:04??
//! - *
//! ```
//!
//! `+` allows and `-` forbids. The pattern is a class name if it names one,
//! otherwise a glob over `"{vid}:{pid}"`.

use protocol::{UsbClass, UsbDevice};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Outcome chosen by a matching rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    Allow,
    Forbid,
}

impl Disposition {
    fn prefix(self) -> char {
        match self {
            Self::Allow => '+',
            Self::Forbid => '-',
        }
    }
}

/// What a rule matches against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleMatch {
    /// Matches when the class is in the device's class set
    Class(UsbClass),
    /// Glob over `"{vid}:{pid}"`
    VidPid(String),
}

/// A single allow/forbid rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterRule {
    pub disposition: Disposition,
    pub matcher: RuleMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleParseError {
    #[error("rule line too short: {0:?}")]
    TooShort(String),

    #[error("rule line must start with '+ ' or '- ': {0:?}")]
    MissingDisposition(String),
}

impl FilterRule {
    pub fn allow_class(class: UsbClass) -> Self {
        Self {
            disposition: Disposition::Allow,
            matcher: RuleMatch::Class(class),
        }
    }

    pub fn forbid_class(class: UsbClass) -> Self {
        Self {
            disposition: Disposition::Forbid,
            matcher: RuleMatch::Class(class),
        }
    }

    pub fn allow_vid_pid(pattern: impl Into<String>) -> Self {
        Self {
            disposition: Disposition::Allow,
            matcher: RuleMatch::VidPid(pattern.into()),
        }
    }

    pub fn forbid_vid_pid(pattern: impl Into<String>) -> Self {
        Self {
            disposition: Disposition::Forbid,
            matcher: RuleMatch::VidPid(pattern.into()),
        }
    }

    /// Parse one rule file line
    pub fn parse_line(line: &str) -> Result<Self, RuleParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.chars().count() < 3 {
            return Err(RuleParseError::TooShort(line.to_string()));
        }

        let (disposition, rest) = if let Some(rest) = line.strip_prefix("+ ") {
            (Disposition::Allow, rest)
        } else if let Some(rest) = line.strip_prefix("- ") {
            (Disposition::Forbid, rest)
        } else {
            return Err(RuleParseError::MissingDisposition(line.to_string()));
        };

        let pattern = rest.trim();
        let matcher = match UsbClass::from_name(pattern) {
            Some(class) => RuleMatch::Class(class),
            None => RuleMatch::VidPid(pattern.to_string()),
        };

        Ok(Self {
            disposition,
            matcher,
        })
    }

    /// Render as a rule file line
    pub fn to_line(&self) -> String {
        self.to_string()
    }

    pub fn matches(&self, device: &UsbDevice) -> bool {
        match &self.matcher {
            RuleMatch::Class(class) => device.classes.contains(class),
            RuleMatch::VidPid(pattern) => glob_match(pattern, &device.vid_pid()),
        }
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pattern = match &self.matcher {
            RuleMatch::Class(class) => class.name(),
            RuleMatch::VidPid(pattern) => pattern.as_str(),
        };
        write!(f, "{} {}", self.disposition.prefix(), pattern)
    }
}

/// Ordered rule sequence
///
/// Order is significant: the first matching rule wins, so reordering two
/// rules can change the outcome for a device both of them match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleList {
    rules: Vec<FilterRule>,
}

impl RuleList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FilterRule> {
        self.rules.iter()
    }

    pub fn get(&self, index: usize) -> Option<&FilterRule> {
        self.rules.get(index)
    }

    /// Append at the lowest priority
    pub fn push(&mut self, rule: FilterRule) {
        self.rules.push(rule);
    }

    /// Insert at `index`, clamped to the end of the list
    pub fn insert(&mut self, index: usize, rule: FilterRule) {
        let index = index.min(self.rules.len());
        self.rules.insert(index, rule);
    }

    pub fn remove(&mut self, index: usize) -> Option<FilterRule> {
        (index < self.rules.len()).then(|| self.rules.remove(index))
    }

    /// Swap the rule at `index` with the one above it. Returns false at the top.
    pub fn move_up(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.rules.len() {
            return false;
        }
        self.rules.swap(index - 1, index);
        true
    }

    /// Swap the rule at `index` with the one below it. Returns false at the bottom.
    pub fn move_down(&mut self, index: usize) -> bool {
        if index + 1 >= self.rules.len() {
            return false;
        }
        self.rules.swap(index, index + 1);
        true
    }

    pub fn swap(&mut self, a: usize, b: usize) -> bool {
        if a >= self.rules.len() || b >= self.rules.len() {
            return false;
        }
        self.rules.swap(a, b);
        true
    }

    /// First matching rule's disposition, `None` if nothing matches
    pub fn evaluate(&self, device: &UsbDevice) -> Option<Disposition> {
        self.rules
            .iter()
            .find(|rule| rule.matches(device))
            .map(|rule| rule.disposition)
    }

    pub fn to_lines(&self) -> Vec<String> {
        self.rules.iter().map(FilterRule::to_line).collect()
    }
}

impl FromIterator<FilterRule> for RuleList {
    fn from_iter<I: IntoIterator<Item = FilterRule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RuleList {
    type Item = &'a FilterRule;
    type IntoIter = std::slice::Iter<'a, FilterRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// Does `rule` match `device`
pub fn matches(device: &UsbDevice, rule: &FilterRule) -> bool {
    rule.matches(device)
}

/// Reduce `devices` to the subset the rules allow
pub fn filter_devices<I>(devices: I, rules: &RuleList) -> Vec<UsbDevice>
where
    I: IntoIterator<Item = UsbDevice>,
{
    devices
        .into_iter()
        .filter(|device| match rules.evaluate(device) {
            Some(Disposition::Allow) => true,
            Some(Disposition::Forbid) => {
                info!("Device {} is forbidden by rule", device);
                false
            }
            None => {
                debug!("Device {} matched no rule, dropping", device);
                false
            }
        })
        .collect()
}

/// Parse rule lines, skipping (and logging) malformed ones
pub fn parse_rules<I, S>(lines: I) -> RuleList
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let line = line.as_ref();
            if line.trim().is_empty() {
                return None;
            }
            match FilterRule::parse_line(line) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!("Skipping {}", e);
                    None
                }
            }
        })
        .collect()
}

/// Read and parse a rule file
pub fn load_rules_file(path: &Path) -> crate::Result<RuleList> {
    let content = std::fs::read_to_string(path).map_err(|source| crate::Error::RulesFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_rules(content.lines()))
}

/// Like [`load_rules_file`], but an unreadable file yields an empty list
pub fn load_rules_or_empty(path: &Path) -> RuleList {
    match load_rules_file(path) {
        Ok(rules) => rules,
        Err(e) => {
            warn!("{}, using an empty rule set", e);
            RuleList::new()
        }
    }
}

/// Case-sensitive glob over the whole string: `*` matches any run, `?` one character
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if let Some((star, absorbed)) = backtrack {
            p = star + 1;
            t = absorbed + 1;
            backtrack = Some((star, absorbed + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
