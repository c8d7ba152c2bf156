//! Betting contract interface.
//!
//! Only the view functions read during reconciliation, the three events the
//! poller decodes, and `placeBet` (for explorer calldata) are declared.

// The sol! macro generates items we can't document.
#![allow(missing_docs)]

use alloy::primitives::{keccak256, B256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

sol! {
    #[sol(rpc)]
    interface IWorldCupBetting {
        struct Team {
            uint256 id;
            string name;
            uint256 totalBetAmount;
            uint256 supporterCount;
        }

        event BetPlaced(address indexed user, uint256 indexed teamId, uint256 amount);
        event StatusChanged(uint8 newStatus);
        event WinnerSelected(uint256 indexed teamId, string teamName);

        function status() external view returns (uint8);
        function totalPrizePool() external view returns (uint256);
        function winningTeamId() external view returns (uint256);
        function getTeams() external view returns (Team[] memory);
        function placeBet(uint256 teamId) external payable;
    }
}

pub const BET_PLACED_TOPIC: B256 = IWorldCupBetting::BetPlaced::SIGNATURE_HASH;
pub const STATUS_CHANGED_TOPIC: B256 = IWorldCupBetting::StatusChanged::SIGNATURE_HASH;
pub const WINNER_SELECTED_TOPIC: B256 = IWorldCupBetting::WinnerSelected::SIGNATURE_HASH;

/// 4-byte selector of `placeBet(uint256)`.
pub const PLACE_BET_SELECTOR: [u8; 4] = IWorldCupBetting::placeBetCall::SELECTOR;

/// Every topic0 the poller subscribes to.
pub fn event_topics() -> Vec<B256> {
    vec![BET_PLACED_TOPIC, STATUS_CHANGED_TOPIC, WINNER_SELECTED_TOPIC]
}

/// Check the generated topic hashes against the textual signatures.
/// Logged at startup so a contract/ABI mismatch shows up immediately.
pub fn verify_topic_hashes() -> Vec<(String, bool)> {
    let checks = [
        ("BetPlaced(address,uint256,uint256)", BET_PLACED_TOPIC),
        ("StatusChanged(uint8)", STATUS_CHANGED_TOPIC),
        ("WinnerSelected(uint256,string)", WINNER_SELECTED_TOPIC),
    ];

    checks
        .into_iter()
        .map(|(sig, expected)| (sig.to_string(), keccak256(sig.as_bytes()) == expected))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_hashes_match_signatures() {
        for (sig, ok) in verify_topic_hashes() {
            assert!(ok, "topic hash mismatch for {sig}");
        }
    }

    #[test]
    fn test_place_bet_selector() {
        let hash = keccak256("placeBet(uint256)".as_bytes());
        assert_eq!(PLACE_BET_SELECTOR, hash[..4]);
    }
}
