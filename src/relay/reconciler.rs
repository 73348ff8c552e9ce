//! Raw hardware bits to user-facing relay states.

use std::collections::BTreeMap;

use super::{RawStates, RelayError, RelayState};
use crate::config::BoardConfig;

pub type RelayStates = BTreeMap<usize, RelayState>;

/// Logical states for one board after a fetch.
///
/// Bit 1 is ON, bit 0 is OFF, flipped for inverted relays. Trigger relays
/// always rest at OFF whatever the hardware reads mid-pulse. A failed fetch
/// yields nothing, so nothing gets published and the broker keeps the last
/// retained state.
pub fn reconcile(board: &BoardConfig, fetched: &Result<RawStates, RelayError>) -> RelayStates {
    let Ok(raw) = fetched else {
        return RelayStates::new();
    };

    board
        .relay_indices()
        .filter_map(|index| {
            let bit = *raw.get(&index)?;
            let state = if board.is_trigger(index) {
                RelayState::Off
            } else {
                board.to_hardware(index, RelayState::from_bit(bit))
            };
            Some((index, state))
        })
        .collect()
}

/// Relays whose state differs from the previous snapshot, with their new
/// state. Everything counts as changed against an empty snapshot.
pub fn changed(previous: &RelayStates, current: &RelayStates) -> Vec<(usize, RelayState)> {
    current
        .iter()
        .filter(|&(index, state)| previous.get(index) != Some(state))
        .map(|(index, state)| (*index, *state))
        .collect()
}
