//! Host-runtime collaborator surface
//!
//! The blockchain runtime that ultimately dispatches compiled modules owns
//! the lifecycle trigger set and the event numbering scheme. The compiler
//! only reads names and constants from here; it never links against the
//! runtime itself.

/// First numeric value assigned to a contract's custom events
///
/// Values below this are reserved by the runtime for built-in event kinds.
pub const CUSTOM_EVENT_BASE: u32 = 64;

/// Account-level lifecycle triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountTrigger {
    /// Tokens minted into the account
    OnMint,
    /// Tokens burned from the account
    OnBurn,
    /// Tokens sent from the account
    OnSend,
    /// Tokens received by the account
    OnReceive,
    /// Witness check for the account
    OnWitness,
    /// Contract upgrade requested
    OnUpgrade,
    /// Account migration requested
    OnMigrate,
    /// Account destruction requested
    OnKill,
}

impl AccountTrigger {
    /// All account triggers, in dispatch order
    pub fn all() -> &'static [AccountTrigger] {
        &[
            AccountTrigger::OnMint,
            AccountTrigger::OnBurn,
            AccountTrigger::OnSend,
            AccountTrigger::OnReceive,
            AccountTrigger::OnWitness,
            AccountTrigger::OnUpgrade,
            AccountTrigger::OnMigrate,
            AccountTrigger::OnKill,
        ]
    }

    /// Canonical trigger name as the runtime spells it
    pub fn name(&self) -> &'static str {
        match self {
            AccountTrigger::OnMint => "onMint",
            AccountTrigger::OnBurn => "onBurn",
            AccountTrigger::OnSend => "onSend",
            AccountTrigger::OnReceive => "onReceive",
            AccountTrigger::OnWitness => "onWitness",
            AccountTrigger::OnUpgrade => "onUpgrade",
            AccountTrigger::OnMigrate => "onMigrate",
            AccountTrigger::OnKill => "onKill",
        }
    }
}

/// Token-level lifecycle triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTrigger {
    /// Token series minted
    OnMint,
    /// Token burned
    OnBurn,
    /// Token sent
    OnSend,
    /// Token received
    OnReceive,
    /// Token infused with assets
    OnInfuse,
    /// Token contract upgrade requested
    OnUpgrade,
    /// Token series created
    OnSeries,
    /// Token metadata written
    OnWrite,
}

impl TokenTrigger {
    /// All token triggers, in dispatch order
    pub fn all() -> &'static [TokenTrigger] {
        &[
            TokenTrigger::OnMint,
            TokenTrigger::OnBurn,
            TokenTrigger::OnSend,
            TokenTrigger::OnReceive,
            TokenTrigger::OnInfuse,
            TokenTrigger::OnUpgrade,
            TokenTrigger::OnSeries,
            TokenTrigger::OnWrite,
        ]
    }

    /// Canonical trigger name as the runtime spells it
    pub fn name(&self) -> &'static str {
        match self {
            TokenTrigger::OnMint => "onMint",
            TokenTrigger::OnBurn => "onBurn",
            TokenTrigger::OnSend => "onSend",
            TokenTrigger::OnReceive => "onReceive",
            TokenTrigger::OnInfuse => "onInfuse",
            TokenTrigger::OnUpgrade => "onUpgrade",
            TokenTrigger::OnSeries => "onSeries",
            TokenTrigger::OnWrite => "onWrite",
        }
    }
}

/// Deduplicated union of account and token trigger names
///
/// This is the set a `trigger` declaration must match, case-insensitively,
/// after `on`-prefix normalization.
pub fn trigger_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = AccountTrigger::all().iter().map(|t| t.name()).collect();
    for trigger in TokenTrigger::all() {
        if !names.contains(&trigger.name()) {
            names.push(trigger.name());
        }
    }
    names
}

/// Resolve a normalized trigger name to its canonical runtime spelling
pub fn canonical_trigger_name(name: &str) -> Option<&'static str> {
    trigger_names()
        .into_iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_deduplicates_shared_names() {
        let names = trigger_names();
        assert!(names.contains(&"onWitness"));
        assert!(names.contains(&"onInfuse"));
        let mints = names.iter().filter(|n| **n == "onMint").count();
        assert_eq!(mints, 1);
    }

    #[test]
    fn test_canonical_lookup_is_case_insensitive() {
        assert_eq!(canonical_trigger_name("onupgrade"), Some("onUpgrade"));
        assert_eq!(canonical_trigger_name("ONSERIES"), Some("onSeries"));
        assert_eq!(canonical_trigger_name("onExplode"), None);
    }
}
