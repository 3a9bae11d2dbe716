use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Declares a persisted swap-state enum. Variants must be listed in
/// ascending code order.
macro_rules! swap_states {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident = $code:literal => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum $name {
            $($variant = $code,)+
        }

        impl $name {
            pub const VARIANTS: &'static [Self] = &[$(Self::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use swap_states;

/// Shared classification and transition graph of a swap family's states.
///
/// The graph is a DAG: a state with no successors is terminal, and every
/// transition applied to a record is checked against [`next_states`].
///
/// [`next_states`]: SwapState::next_states
pub trait SwapState: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {
    const ALL: &'static [Self];

    fn code(self) -> i32;

    fn label(self) -> &'static str;

    fn next_states(self) -> &'static [Self];

    fn is_successful(self) -> bool;

    fn is_failed(self) -> bool;

    fn is_quote_expired(self) -> bool;

    fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.code() == code)
    }

    fn can_transition_to(self, next: Self) -> bool {
        self.next_states().contains(&next)
    }

    fn is_terminal(self) -> bool {
        self.next_states().is_empty()
    }

    fn is_quote_soft_expired(self) -> bool {
        false
    }

    fn is_claimable(self) -> bool {
        false
    }

    fn is_refundable(self) -> bool {
        false
    }

    fn requires_action(self) -> bool {
        self.is_claimable() || self.is_refundable()
    }

    fn is_finished(self) -> bool {
        self.is_successful() || self.is_failed() || self.is_quote_expired()
    }

    /// Entering this state requires counterparty signature data on the record.
    fn requires_signature(self) -> bool {
        false
    }

    fn pending_codes() -> Vec<i32> {
        Self::ALL
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.code())
            .collect()
    }
}

/// Type-erased view of one state code, for tooling that only has a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateInfo {
    pub label: &'static str,
    pub terminal: bool,
    pub finished: bool,
    pub quote_expired: bool,
    pub requires_action: bool,
}

pub(crate) fn state_info<S: SwapState>(code: i32) -> Option<StateInfo> {
    let state = S::from_code(code)?;
    Some(StateInfo {
        label: state.label(),
        terminal: state.is_terminal(),
        finished: state.is_finished(),
        quote_expired: state.is_quote_expired(),
        requires_action: state.requires_action(),
    })
}
