//! Fixed mapping from chat reactions to review operations.

/// Recognized review signals carried by reactions on the announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewSignal {
    /// Reviewer is actively looking at the change.
    Watching,
    /// Reviewer approved the change.
    Approved,
}

impl ReviewSignal {
    pub const ALL: [ReviewSignal; 2] = [ReviewSignal::Watching, ReviewSignal::Approved];

    /// Resolves a reaction name; unrecognized reactions carry no signal.
    pub fn from_reaction(name: &str) -> Option<Self> {
        let name = name.trim().trim_matches(':');
        Self::ALL
            .into_iter()
            .find(|signal| signal.reaction_name() == name)
    }

    pub fn reaction_name(self) -> &'static str {
        match self {
            Self::Watching => "eyes",
            Self::Approved => "white_check_mark",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Watching => "👀",
            Self::Approved => "✅",
        }
    }
}
