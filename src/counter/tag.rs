//! Delta tags carried on queue tasks

/// Direction of a unit delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaTag {
    Incr,
    Decr,
}

impl DeltaTag {
    /// Tag string on the queue
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaTag::Incr => "++",
            DeltaTag::Decr => "--",
        }
    }

    /// Parse a queue tag; `None` for anything that is not a delta
    pub fn parse(tag: &str) -> Option<DeltaTag> {
        match tag {
            "++" => Some(DeltaTag::Incr),
            "--" => Some(DeltaTag::Decr),
            _ => None,
        }
    }

    pub fn delta(&self) -> i64 {
        match self {
            DeltaTag::Incr => 1,
            DeltaTag::Decr => -1,
        }
    }
}

impl std::fmt::Display for DeltaTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
