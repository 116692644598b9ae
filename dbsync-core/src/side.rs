use serde::Serialize;
use std::fmt;

/// One of the two stores being merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Dev,
    Prod,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Dev => Side::Prod,
            Side::Prod => Side::Dev,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Dev => write!(f, "dev"),
            Side::Prod => write!(f, "prod"),
        }
    }
}

/// Direction a row or value travels during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    DevToProd,
    ProdToDev,
}

impl Direction {
    /// Direction whose target is `side`.
    pub fn into_side(side: Side) -> Direction {
        match side {
            Side::Prod => Direction::DevToProd,
            Side::Dev => Direction::ProdToDev,
        }
    }

    pub fn source(self) -> Side {
        match self {
            Direction::DevToProd => Side::Dev,
            Direction::ProdToDev => Side::Prod,
        }
    }

    pub fn target(self) -> Side {
        self.source().other()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source(), self.target())
    }
}
