use serde::{Deserialize, Serialize};

/// Server-assigned game identifier.
pub type GameId = String;

/// Clock settings for a game. `initial` and `increment` are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    pub initial: u32,
    pub increment: u32,
    #[serde(rename = "type")]
    pub kind: TimeControlKind,
}

impl TimeControl {
    pub fn new(initial: u32, increment: u32, kind: TimeControlKind) -> Self {
        Self {
            initial,
            increment,
            kind,
        }
    }

    /// 3+2 blitz.
    pub fn blitz() -> Self {
        Self::new(180, 2, TimeControlKind::Blitz)
    }

    /// 10+0 rapid.
    pub fn rapid() -> Self {
        Self::new(600, 0, TimeControlKind::Rapid)
    }

    /// Starting clock in milliseconds, the unit `timeLeft` is reported in.
    pub fn initial_millis(&self) -> u64 {
        u64::from(self.initial) * 1000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeControlKind {
    Bullet,
    Blitz,
    Rapid,
    Classical,
    Custom,
}

/// Side of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceColor {
    White,
    Black,
}

impl PieceColor {
    pub fn opponent(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

/// Matchmaking color preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorPreference {
    White,
    Black,
    #[default]
    Random,
}

/// Acceptable opponent rating window for matchmaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingRange {
    pub min: u32,
    pub max: u32,
}

impl RatingRange {
    /// Window of `spread` points on either side of `rating`.
    pub fn around(rating: u32, spread: u32) -> Self {
        Self {
            min: rating.saturating_sub(spread),
            max: rating.saturating_add(spread),
        }
    }

    pub fn contains(&self, rating: u32) -> bool {
        (self.min..=self.max).contains(&rating)
    }
}

/// A move as the client describes it. Legality is decided by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveDescriptor {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

impl MoveDescriptor {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            promotion: None,
        }
    }

    #[must_use]
    pub fn with_promotion(mut self, piece: impl Into<String>) -> Self {
        self.promotion = Some(piece.into());
        self
    }
}
