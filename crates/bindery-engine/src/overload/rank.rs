//! Match ranks
//!
//! Ranks are ordered so that a greater rank is a better match.

use std::cmp::Ordering;
use std::fmt;

/// How well one argument matches one parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchRank {
    /// Multi-step or narrowing conversion
    Narrowing = 0,
    /// Implicit single-step conversion (int → enum, str → std::string)
    Conversion = 1,
    /// Numeric promotion without precision loss
    Promotion = 2,
    /// Derived-to-base pointer or reference widening
    DerivedToBase = 3,
    /// Identical type
    Exact = 4,
}

impl fmt::Display for MatchRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchRank::Narrowing => "narrowing",
            MatchRank::Conversion => "conversion",
            MatchRank::Promotion => "promotion",
            MatchRank::DerivedToBase => "derived-to-base",
            MatchRank::Exact => "exact",
        };
        f.write_str(name)
    }
}

/// Rank of a whole candidate signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureRank {
    /// Worst per-argument rank
    pub worst: MatchRank,
    /// Arguments that are not exact matches
    pub conversions: usize,
    /// Declaration index within the overload set
    pub order: usize,
}

impl SignatureRank {
    /// Combine per-argument ranks. A call without arguments is exact.
    pub fn from_args(ranks: &[MatchRank], order: usize) -> Self {
        Self {
            worst: ranks.iter().copied().min().unwrap_or(MatchRank::Exact),
            conversions: ranks.iter().filter(|r| **r != MatchRank::Exact).count(),
            order,
        }
    }

    /// Check if two candidates cannot be told apart except by declaration order
    pub fn ties_with(&self, other: &SignatureRank) -> bool {
        self.worst == other.worst && self.conversions == other.conversions
    }

    /// Ordering where `Less` means "better"
    pub fn preference(&self, other: &SignatureRank) -> Ordering {
        other
            .worst
            .cmp(&self.worst)
            .then(self.conversions.cmp(&other.conversions))
            .then(self.order.cmp(&other.order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order() {
        assert!(MatchRank::Exact > MatchRank::DerivedToBase);
        assert!(MatchRank::DerivedToBase > MatchRank::Promotion);
        assert!(MatchRank::Promotion > MatchRank::Conversion);
        assert!(MatchRank::Conversion > MatchRank::Narrowing);
    }

    #[test]
    fn test_worst_rank_decides() {
        let a = SignatureRank::from_args(&[MatchRank::Exact, MatchRank::Narrowing], 0);
        let b = SignatureRank::from_args(&[MatchRank::Conversion, MatchRank::Conversion], 1);
        assert_eq!(b.preference(&a), Ordering::Less);
    }

    #[test]
    fn test_fewer_conversions_then_order() {
        let a = SignatureRank::from_args(&[MatchRank::Promotion, MatchRank::Promotion], 0);
        let b = SignatureRank::from_args(&[MatchRank::Exact, MatchRank::Promotion], 1);
        assert_eq!(b.preference(&a), Ordering::Less);

        let c = SignatureRank::from_args(&[MatchRank::Exact, MatchRank::Promotion], 2);
        assert!(b.ties_with(&c));
        assert_eq!(b.preference(&c), Ordering::Less);
    }

    #[test]
    fn test_empty_call_is_exact() {
        assert_eq!(SignatureRank::from_args(&[], 0).worst, MatchRank::Exact);
    }
}
