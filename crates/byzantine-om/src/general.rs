//! Generals, their orders, and the per-run loyalty registry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Index of a general in `[0, n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GeneralId(pub usize);

impl GeneralId {
    /// Parity used by the default traitor rule.
    pub const fn is_even(self) -> bool {
        self.0 % 2 == 0
    }
}

impl fmt::Display for GeneralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for GeneralId {
    fn from(id: usize) -> Self {
        Self(id)
    }
}

/// An order: attack or retreat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Decision {
    Attack,
    Retreat,
}

impl Decision {
    /// The single-character wire form ('A' or 'R').
    pub const fn as_char(self) -> char {
        match self {
            Self::Attack => 'A',
            Self::Retreat => 'R',
        }
    }

    /// The opposite order.
    #[must_use]
    pub const fn flip(self) -> Self {
        match self {
            Self::Attack => Self::Retreat,
            Self::Retreat => Self::Attack,
        }
    }
}

impl TryFrom<char> for Decision {
    type Error = Error;

    fn try_from(c: char) -> Result<Self> {
        match c {
            'A' | 'a' => Ok(Self::Attack),
            'R' | 'r' => Ok(Self::Retreat),
            other => Err(Error::InvalidCommand(other)),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One general and its role flags for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct General {
    pub id: GeneralId,
    pub loyal: bool,
    /// Set on the root commander once `broadcast` names it.
    pub is_commander: bool,
    pub is_reporter: bool,
}

/// Per-run record of who is loyal, who commands, and who reports.
#[derive(Debug, Default)]
pub struct Registry {
    generals: Vec<General>,
}

impl Registry {
    /// Build the registry from a loyalty vector.
    ///
    /// Fails on an empty vector, an out-of-range reporter, or when the
    /// registry cannot be allocated. Nobody is commander yet.
    pub fn new(loyal: &[bool], reporter: GeneralId) -> Result<Self> {
        if loyal.is_empty() {
            return Err(Error::NoGenerals);
        }
        if reporter.0 >= loyal.len() {
            return Err(Error::UnknownGeneral(reporter));
        }

        let mut generals = Vec::new();
        generals.try_reserve_exact(loyal.len())?;
        generals.extend(loyal.iter().enumerate().map(|(i, &loyal)| General {
            id: GeneralId(i),
            loyal,
            is_commander: false,
            is_reporter: i == reporter.0,
        }));

        Ok(Self { generals })
    }

    /// Number of generals `n`.
    pub fn len(&self) -> usize {
        self.generals.len()
    }

    /// True once cleared (or never populated).
    pub fn is_empty(&self) -> bool {
        self.generals.is_empty()
    }

    /// Number of disloyal generals `m`.
    pub fn traitors(&self) -> usize {
        self.generals.iter().filter(|g| !g.loyal).count()
    }

    /// The designated reporter.
    pub fn reporter(&self) -> Option<GeneralId> {
        self.generals.iter().find(|g| g.is_reporter).map(|g| g.id)
    }

    /// The root commander, once marked.
    pub fn commander(&self) -> Option<GeneralId> {
        self.generals.iter().find(|g| g.is_commander).map(|g| g.id)
    }

    /// Mark `id` as root commander. Fails if someone already is.
    pub fn mark_commander(&mut self, id: GeneralId) -> Result<()> {
        if self.commander().is_some() {
            return Err(Error::AlreadyBroadcast);
        }
        let general = self.generals.get_mut(id.0).ok_or(Error::UnknownGeneral(id))?;
        general.is_commander = true;
        Ok(())
    }

    pub fn get(&self, id: GeneralId) -> Option<&General> {
        self.generals.get(id.0)
    }

    /// Loyalty of `id`. Unknown ids count as disloyal.
    pub fn is_loyal(&self, id: GeneralId) -> bool {
        self.get(id).map_or(false, |g| g.loyal)
    }

    pub fn is_commander(&self, id: GeneralId) -> bool {
        self.get(id).map_or(false, |g| g.is_commander)
    }

    pub fn is_reporter(&self, id: GeneralId) -> bool {
        self.get(id).map_or(false, |g| g.is_reporter)
    }

    /// Loyalty flags in id order.
    pub fn loyalty(&self) -> Vec<bool> {
        self.generals.iter().map(|g| g.loyal).collect()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.generals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_chars() {
        assert_eq!(Decision::try_from('A'), Ok(Decision::Attack));
        assert_eq!(Decision::try_from('r'), Ok(Decision::Retreat));
        assert_eq!(Decision::try_from('X'), Err(Error::InvalidCommand('X')));
        assert_eq!(Decision::Attack.as_char(), 'A');
        assert_eq!(Decision::Retreat.flip(), Decision::Attack);
    }

    #[test]
    fn registry_marks_only_reporter() {
        let reg = Registry::new(&[true, true, false, true], GeneralId(2)).unwrap();
        assert_eq!(reg.len(), 4);
        assert_eq!(reg.traitors(), 1);
        assert_eq!(reg.reporter(), Some(GeneralId(2)));
        assert!(reg.is_reporter(GeneralId(2)));
        assert!(!reg.is_reporter(GeneralId(0)));
        assert_eq!(reg.commander(), None);
        assert_eq!(reg.loyalty(), vec![true, true, false, true]);
        assert!(!reg.is_loyal(GeneralId(2)));
        assert!(reg.is_loyal(GeneralId(3)));
        assert!(!reg.is_loyal(GeneralId(9)));
    }

    #[test]
    fn registry_rejects_bad_input() {
        assert_eq!(Registry::new(&[], GeneralId(0)).unwrap_err(), Error::NoGenerals);
        assert_eq!(
            Registry::new(&[true, true], GeneralId(2)).unwrap_err(),
            Error::UnknownGeneral(GeneralId(2))
        );
    }

    #[test]
    fn one_commander_per_run() {
        let mut reg = Registry::new(&[true, true, true, true], GeneralId(0)).unwrap();
        assert_eq!(
            reg.mark_commander(GeneralId(4)).unwrap_err(),
            Error::UnknownGeneral(GeneralId(4))
        );
        reg.mark_commander(GeneralId(1)).unwrap();
        assert!(reg.is_commander(GeneralId(1)));
        assert!(!reg.is_commander(GeneralId(0)));
        assert_eq!(reg.mark_commander(GeneralId(2)).unwrap_err(), Error::AlreadyBroadcast);
        assert_eq!(reg.commander(), Some(GeneralId(1)));
    }

    #[test]
    fn clear_resets_everything() {
        let mut reg = Registry::new(&[true, false], GeneralId(0)).unwrap();
        reg.clear();
        assert!(reg.is_empty());
        assert_eq!(reg.traitors(), 0);
        assert_eq!(reg.reporter(), None);
    }
}
