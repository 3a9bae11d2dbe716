use std::collections::HashSet;

use lp_swap::swap::escrow::{FromBtcLnState, FromBtcState, ToBtcState};
use lp_swap::swap::trusted::{LnForGasState, OnchainForGasState};
use lp_swap::swap::vault::SpvFromBtcState;
use lp_swap::swap::{SwapState, SwapType};

fn assert_acyclic<S: SwapState>(state: S, path: &mut Vec<S>, done: &mut HashSet<S>) {
    if done.contains(&state) {
        return;
    }
    assert!(!path.contains(&state), "cycle through {state}: {path:?}");
    path.push(state);
    for &next in state.next_states() {
        assert_acyclic(next, path, done);
    }
    path.pop();
    done.insert(state);
}

fn check_graph<S: SwapState>(swap_type: SwapType) {
    let mut done = HashSet::new();
    for &state in S::ALL {
        assert_acyclic(state, &mut Vec::new(), &mut done);

        assert_eq!(
            state.is_terminal(),
            state.next_states().is_empty(),
            "{swap_type} {state}"
        );
        assert!(
            !(state.is_successful() && state.is_failed()),
            "{swap_type} {state} is both successful and failed"
        );
        assert_eq!(S::from_code(state.code()), Some(state));
        for next in state.next_states() {
            assert!(S::ALL.contains(next), "{swap_type} {state} -> {next}");
            assert_ne!(*next, state, "{swap_type} {state} loops on itself");
        }

        let info = swap_type.state_info(state.code()).expect("known code");
        assert_eq!(info.label, state.label());
        assert_eq!(info.terminal, state.is_terminal());
        assert_eq!(info.requires_action, state.requires_action());
    }

    let pending = swap_type.pending_codes();
    assert!(!pending.is_empty(), "{swap_type} has no pending states");
    for code in pending {
        let state = S::from_code(code).expect("pending code");
        assert!(!state.is_terminal());
    }
    assert!(swap_type.state_info(i32::MAX).is_none());
    assert!(S::ALL.iter().any(|s| s.is_successful()), "{swap_type}");
}

#[test]
fn every_family_has_a_well_formed_state_graph() {
    check_graph::<ToBtcState>(SwapType::ToBtc);
    check_graph::<ToBtcState>(SwapType::ToBtcLn);
    check_graph::<FromBtcState>(SwapType::FromBtc);
    check_graph::<FromBtcLnState>(SwapType::FromBtcLn);
    check_graph::<SpvFromBtcState>(SwapType::SpvFromBtc);
    check_graph::<LnForGasState>(SwapType::LnForGas);
    check_graph::<OnchainForGasState>(SwapType::OnchainForGas);
}

#[test]
fn successful_states_are_reached_only_forward() {
    // A claimed swap can never be refunded afterwards, in any family.
    assert!(ToBtcState::Claimed.is_terminal());
    assert!(!ToBtcState::SoftClaimed.can_transition_to(ToBtcState::Refunded));
    assert!(FromBtcState::ClaimClaimed.is_terminal());
    assert!(FromBtcLnState::ClaimClaimed.is_terminal());
    assert!(SpvFromBtcState::Claimed.is_terminal());
    assert!(LnForGasState::Finished.is_terminal());
    assert!(OnchainForGasState::Finished.is_terminal());
}
