//! Progress tracking and inheritance
//!
//! A task's progress is `(current, total, message)`. A child attached with a
//! [`ProgressInheritance`] rule drives its parent's progress through a
//! [`ProgressLink`].

use serde::{Deserialize, Serialize};
use tasktree_foundation::{Error, Result};

// ============================================================================
// Progress
// ============================================================================

/// Progress of one task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Work done so far, never negative
    pub current: f64,

    /// Amount of work expected, if known. Always positive and `>= current`.
    pub total: Option<f64>,

    /// Free-form status line
    pub message: Option<String>,
}

impl Progress {
    /// `current / total`, when the total is known
    pub fn fraction(&self) -> Option<f64> {
        self.total.map(|total| self.current / total)
    }

    /// Apply a partial update. Missing values keep their current value.
    ///
    /// Returns the would-be progress without touching `self`, or an error if
    /// the result would violate `0 <= current <= total`.
    pub fn updated(
        &self,
        current: Option<f64>,
        total: Option<f64>,
        message: Option<String>,
    ) -> Result<Progress> {
        let current = current.unwrap_or(self.current);
        let total = total.or(self.total);

        if !(current >= 0.0) || !current.is_finite() {
            return Err(Error::InvalidProgress(format!(
                "current must be a finite number >= 0, got {}",
                current
            )));
        }

        if let Some(total) = total {
            if !(total > 0.0) || !total.is_finite() {
                return Err(Error::InvalidProgress(format!(
                    "total must be a finite number > 0, got {}",
                    total
                )));
            }
            if current > total {
                return Err(Error::InvalidProgress(format!(
                    "current ({}) exceeds total ({})",
                    current, total
                )));
            }
        }

        Ok(Progress {
            current,
            total,
            message: message.or_else(|| self.message.clone()),
        })
    }

    /// Progress of a task that resolved: the total defaults to
    /// `max(current, 1)` and current is set equal to it.
    pub fn completed(&self) -> Progress {
        let total = self.total.unwrap_or_else(|| self.current.max(1.0));
        Progress {
            current: total,
            total: Some(total),
            message: self.message.clone(),
        }
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.total {
            Some(total) => write!(f, "{}/{}", self.current, total)?,
            None => write!(f, "{}/?", self.current)?,
        }
        if let Some(message) = &self.message {
            write!(f, " - {}", message)?;
        }
        Ok(())
    }
}

// ============================================================================
// Inheritance rules
// ============================================================================

/// How a child's progress maps into its parent's
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ProgressInheritance {
    /// The parent's progress is not touched by this child
    #[default]
    None,

    /// `parent.current = child.current + offset`
    Offset(f64),

    /// The child's fraction is spread linearly over `[start, end]`
    Range(f64, f64),

    /// Full control
    Rule(InheritanceRule),
}

/// Explicit inheritance record
#[derive(Debug, Clone, PartialEq)]
pub struct InheritanceRule {
    /// Added to the mapped value. Defaults to the parent's progress at
    /// attach time.
    pub offset: Option<f64>,

    /// Width of the parent range the child's fraction is scaled to. Without
    /// a scale the child's raw `current` is added to the offset.
    pub scale: Option<f64>,

    /// Forward the child's messages to the parent
    pub inherit_messages: bool,

    /// Custom event names re-emitted verbatim on the parent
    pub forwarded_events: Vec<String>,
}

impl Default for InheritanceRule {
    fn default() -> Self {
        Self {
            offset: None,
            scale: None,
            inherit_messages: true,
            forwarded_events: Vec::new(),
        }
    }
}

impl InheritanceRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_messages(mut self, inherit: bool) -> Self {
        self.inherit_messages = inherit;
        self
    }

    pub fn forward_event(mut self, name: impl Into<String>) -> Self {
        self.forwarded_events.push(name.into());
        self
    }
}

impl ProgressInheritance {
    /// Validate the rule and resolve it against the parent's progress at
    /// attach time. `None` means the child does not drive the parent.
    pub fn link(&self, parent_current: f64) -> Result<Option<ProgressLink>> {
        let link = match self {
            ProgressInheritance::None => return Ok(None),
            ProgressInheritance::Offset(offset) => ProgressLink {
                offset: *offset,
                scale: None,
                inherit_messages: true,
                forwarded_events: Vec::new(),
            },
            ProgressInheritance::Range(start, end) => {
                if end < start {
                    return Err(Error::InvalidInheritance(format!(
                        "range end ({}) is before its start ({})",
                        end, start
                    )));
                }
                ProgressLink {
                    offset: *start,
                    scale: Some(end - start),
                    inherit_messages: true,
                    forwarded_events: Vec::new(),
                }
            }
            ProgressInheritance::Rule(rule) => ProgressLink {
                offset: rule.offset.unwrap_or(parent_current),
                scale: rule.scale,
                inherit_messages: rule.inherit_messages,
                forwarded_events: rule.forwarded_events.clone(),
            },
        };

        if !link.offset.is_finite() {
            return Err(Error::InvalidInheritance(format!(
                "offset must be finite, got {}",
                link.offset
            )));
        }
        if let Some(scale) = link.scale {
            if !(scale >= 0.0) || !scale.is_finite() {
                return Err(Error::InvalidInheritance(format!(
                    "scale must be a finite number >= 0, got {}",
                    scale
                )));
            }
        }

        Ok(Some(link))
    }
}

impl From<f64> for ProgressInheritance {
    fn from(offset: f64) -> Self {
        ProgressInheritance::Offset(offset)
    }
}

impl From<(f64, f64)> for ProgressInheritance {
    fn from((start, end): (f64, f64)) -> Self {
        ProgressInheritance::Range(start, end)
    }
}

impl From<InheritanceRule> for ProgressInheritance {
    fn from(rule: InheritanceRule) -> Self {
        ProgressInheritance::Rule(rule)
    }
}

// ============================================================================
// ProgressLink
// ============================================================================

/// A resolved inheritance rule between one child and its parent
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLink {
    pub offset: f64,
    pub scale: Option<f64>,
    pub inherit_messages: bool,
    pub forwarded_events: Vec<String>,
}

impl ProgressLink {
    /// Parent `current` for the given child progress
    pub fn map_current(&self, child: &Progress) -> f64 {
        match (self.scale, child.total) {
            (None, _) => child.current + self.offset,
            // Unknown child total pins the parent at the start of the range
            (Some(_), None) => self.offset,
            (Some(scale), Some(total)) => (child.current / total) * scale + self.offset,
        }
    }

    /// Parent message for the given child progress, if it is forwarded
    pub fn map_message(&self, child: &Progress) -> Option<String> {
        if self.inherit_messages {
            child.message.clone()
        } else {
            None
        }
    }

    pub fn forwards(&self, event_name: &str) -> bool {
        self.forwarded_events.iter().any(|name| name == event_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(current: f64, total: Option<f64>) -> Progress {
        Progress {
            current,
            total,
            message: None,
        }
    }

    #[test]
    fn test_update_defaults_missing_values() {
        let base = progress(1.0, Some(4.0));
        let next = base.updated(None, None, Some("half".into())).unwrap();
        assert_eq!(next.current, 1.0);
        assert_eq!(next.total, Some(4.0));
        assert_eq!(next.message.as_deref(), Some("half"));
    }

    #[test]
    fn test_update_rejects_out_of_bounds() {
        let base = progress(0.0, None);
        assert!(base.updated(Some(-1.0), None, None).is_err());
        assert!(base.updated(None, Some(0.0), None).is_err());
        assert!(base.updated(Some(5.0), Some(4.0), None).is_err());
        assert!(base.updated(Some(f64::NAN), None, None).is_err());
        assert!(progress(3.0, None).updated(None, Some(2.0), None).is_err());
    }

    #[test]
    fn test_completed() {
        assert_eq!(progress(0.0, None).completed(), progress(1.0, Some(1.0)));
        assert_eq!(progress(2.5, None).completed(), progress(2.5, Some(2.5)));
        assert_eq!(progress(1.0, Some(4.0)).completed(), progress(4.0, Some(4.0)));
    }

    #[test]
    fn test_fraction() {
        assert_eq!(progress(1.0, Some(4.0)).fraction(), Some(0.25));
        assert_eq!(progress(1.0, None).fraction(), None);
    }

    #[test]
    fn test_range_link_is_linear() {
        let link = ProgressInheritance::Range(2.0, 3.0).link(0.0).unwrap().unwrap();
        let mapped = link.map_current(&progress(1.0, Some(10.0)));
        assert!((mapped - 2.1).abs() < 1e-9);
        assert_eq!(link.map_current(&progress(5.0, None)), 2.0);
    }

    #[test]
    fn test_offset_link_adds_raw_current() {
        let link = ProgressInheritance::Offset(3.0).link(0.0).unwrap().unwrap();
        assert_eq!(link.map_current(&progress(2.0, Some(10.0))), 5.0);
    }

    #[test]
    fn test_rule_offset_defaults_to_parent_current() {
        let rule = InheritanceRule::new().with_scale(2.0);
        let link = ProgressInheritance::Rule(rule).link(1.5).unwrap().unwrap();
        assert_eq!(link.offset, 1.5);
        assert_eq!(link.map_current(&progress(1.0, Some(2.0))), 2.5);
    }

    #[test]
    fn test_invalid_rules() {
        assert!(ProgressInheritance::Range(3.0, 2.0).link(0.0).is_err());
        let negative = InheritanceRule::new().with_scale(-1.0);
        assert!(ProgressInheritance::Rule(negative).link(0.0).is_err());
        assert_eq!(ProgressInheritance::None.link(0.0).unwrap(), None);
    }

    #[test]
    fn test_message_forwarding() {
        let quiet = InheritanceRule::new().with_messages(false).forward_event("log");
        let link = ProgressInheritance::Rule(quiet).link(0.0).unwrap().unwrap();
        let child = Progress {
            current: 0.0,
            total: None,
            message: Some("compiling".into()),
        };
        assert_eq!(link.map_message(&child), None);
        assert!(link.forwards("log"));
        assert!(!link.forwards("other"));
    }

    #[test]
    fn test_display() {
        assert_eq!(progress(1.0, Some(4.0)).to_string(), "1/4");
        let with_message = Progress {
            current: 0.5,
            total: None,
            message: Some("fetching".into()),
        };
        assert_eq!(with_message.to_string(), "0.5/? - fetching");
    }
}
