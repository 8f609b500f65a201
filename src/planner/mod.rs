//! Distribution planner
//!
//! Pure, deterministic assignment of targets to funding wallets.
//!
//! Targets are cut into contiguous chunks of
//! `min(max_per_wallet, ceil(n / wallets))` and handed to wallets in the
//! order supplied. Concatenating the buckets gives back the input order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-operation cost and timing assumptions used for estimates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Flat fee per operation (lamports)
    #[serde(default = "default_fixed_fee")]
    pub fixed_fee_lamports: u64,
    /// Price per compute unit (lamports)
    #[serde(default = "default_gas_price")]
    pub gas_price: u64,
    /// Compute units consumed per operation
    #[serde(default = "default_gas_per_operation")]
    pub gas_per_operation: u64,
    /// Wall-clock seconds per operation on one wallet
    #[serde(default = "default_per_operation_secs")]
    pub per_operation_secs: f64,
}

fn default_fixed_fee() -> u64 {
    5_000
}

fn default_gas_price() -> u64 {
    1
}

fn default_gas_per_operation() -> u64 {
    25_000
}

fn default_per_operation_secs() -> f64 {
    2.0
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            fixed_fee_lamports: default_fixed_fee(),
            gas_price: default_gas_price(),
            gas_per_operation: default_gas_per_operation(),
            per_operation_secs: default_per_operation_secs(),
        }
    }
}

impl CostModel {
    /// Estimated lamports for one operation
    pub fn per_operation_lamports(&self) -> u128 {
        self.fixed_fee_lamports as u128 + self.gas_price as u128 * self.gas_per_operation as u128
    }
}

/// Targets assigned to one wallet, in execution order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAssignment<T> {
    pub wallet: String,
    pub targets: Vec<T>,
}

/// Immutable result of planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan<T> {
    pub total_jobs: usize,
    /// Participating wallets, in assignment order
    pub wallets: Vec<String>,
    pub assignments: Vec<WalletAssignment<T>>,
    /// `ceil(n / wallets supplied)`
    pub tokens_per_wallet: usize,
    pub estimated_cost_lamports: u64,
    pub estimated_duration_secs: f64,
}

impl<T> DeploymentPlan<T> {
    /// Targets assigned to `wallet`, if it participates
    pub fn targets_for(&self, wallet: &str) -> Option<&[T]> {
        self.assignments
            .iter()
            .find(|a| a.wallet == wallet)
            .map(|a| a.targets.as_slice())
    }

    /// Largest bucket size
    pub fn max_bucket(&self) -> usize {
        self.assignments.iter().map(|a| a.targets.len()).max().unwrap_or(0)
    }

    pub fn estimated_cost_sol(&self) -> f64 {
        self.estimated_cost_lamports as f64 / 1_000_000_000.0
    }
}

/// Assign `targets` to `wallets`
pub fn plan<T: Clone>(
    targets: &[T],
    wallets: &[String],
    max_per_wallet: usize,
    cost: &CostModel,
) -> Result<DeploymentPlan<T>> {
    if targets.is_empty() {
        return Err(Error::NoTargets);
    }
    if wallets.is_empty() {
        return Err(Error::NoWallets);
    }
    if max_per_wallet == 0 {
        return Err(Error::InvalidConfig("max_per_wallet must be at least 1".to_string()));
    }

    let mut seen = HashSet::with_capacity(wallets.len());
    for wallet in wallets {
        if !seen.insert(wallet.as_str()) {
            return Err(Error::InvalidConfig(format!("duplicate wallet {}", wallet)));
        }
    }

    let n = targets.len();
    let capacity = wallets.len().saturating_mul(max_per_wallet);
    if n > capacity {
        return Err(Error::CapacityExceeded {
            targets: n,
            capacity,
            shortfall: n - capacity,
        });
    }

    let tokens_per_wallet = n.div_ceil(wallets.len());
    let chunk = max_per_wallet.min(tokens_per_wallet);

    let assignments: Vec<WalletAssignment<T>> = wallets
        .iter()
        .zip(targets.chunks(chunk))
        .map(|(wallet, bucket)| WalletAssignment {
            wallet: wallet.clone(),
            targets: bucket.to_vec(),
        })
        .collect();

    let estimated_cost_lamports = (n as u128)
        .saturating_mul(cost.per_operation_lamports())
        .min(u64::MAX as u128) as u64;
    let estimated_duration_secs = tokens_per_wallet as f64 * cost.per_operation_secs;

    Ok(DeploymentPlan {
        total_jobs: n,
        wallets: assignments.iter().map(|a| a.wallet.clone()).collect(),
        assignments,
        tokens_per_wallet,
        estimated_cost_lamports,
        estimated_duration_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallets(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("wallet{}", i)).collect()
    }

    fn targets(n: usize) -> Vec<u32> {
        (0..n as u32).collect()
    }

    #[test]
    fn test_five_targets_two_wallets() {
        let plan = plan(&targets(5), &wallets(2), 3, &CostModel::default()).unwrap();

        assert_eq!(plan.total_jobs, 5);
        assert_eq!(plan.tokens_per_wallet, 3);
        assert_eq!(plan.wallets, vec!["wallet0", "wallet1"]);
        assert_eq!(plan.targets_for("wallet0").unwrap(), &[0, 1, 2]);
        assert_eq!(plan.targets_for("wallet1").unwrap(), &[3, 4]);
    }

    #[test]
    fn test_capacity_exceeded() {
        let err = plan(&targets(10), &wallets(3), 2, &CostModel::default()).unwrap_err();
        match err {
            Error::CapacityExceeded {
                targets,
                capacity,
                shortfall,
            } => {
                assert_eq!(targets, 10);
                assert_eq!(capacity, 6);
                assert_eq!(shortfall, 4);
            }
            other => panic!("expected CapacityExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_every_target_exactly_once_in_order() {
        for n in 1..=20 {
            for w in 1..=6 {
                for max in 1..=8 {
                    match plan(&targets(n), &wallets(w), max, &CostModel::default()) {
                        Ok(p) => {
                            let flat: Vec<u32> = p
                                .assignments
                                .iter()
                                .flat_map(|a| a.targets.iter().copied())
                                .collect();
                            assert_eq!(flat, targets(n), "n={} w={} max={}", n, w, max);
                            assert!(p.max_bucket() <= max);
                            assert!(p.max_bucket() <= p.tokens_per_wallet);
                            assert!(p.assignments.iter().all(|a| !a.targets.is_empty()));
                        }
                        Err(Error::CapacityExceeded { .. }) => assert!(n > w * max),
                        Err(other) => panic!("unexpected error {:?}", other),
                    }
                }
            }
        }
    }

    #[test]
    fn test_unused_wallets_not_participants() {
        let plan = plan(&targets(2), &wallets(4), 5, &CostModel::default()).unwrap();
        assert_eq!(plan.tokens_per_wallet, 1);
        assert_eq!(plan.wallets, vec!["wallet0", "wallet1"]);
        assert!(plan.targets_for("wallet3").is_none());
    }

    #[test]
    fn test_input_validation() {
        let cost = CostModel::default();
        assert_eq!(plan::<u32>(&[], &wallets(1), 1, &cost).unwrap_err().code(), "NO_TARGETS");
        assert_eq!(plan(&targets(1), &[], 1, &cost).unwrap_err().code(), "NO_WALLETS");
        assert_eq!(plan(&targets(1), &wallets(1), 0, &cost).unwrap_err().code(), "INVALID_CONFIG");

        let dup = vec!["a".to_string(), "a".to_string()];
        assert_eq!(plan(&targets(2), &dup, 1, &cost).unwrap_err().code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_estimates() {
        let cost = CostModel {
            fixed_fee_lamports: 5_000,
            gas_price: 2,
            gas_per_operation: 1_000,
            per_operation_secs: 1.5,
        };
        let plan = plan(&targets(7), &wallets(3), 5, &cost).unwrap();
        assert_eq!(plan.estimated_cost_lamports, 7 * 7_000);
        assert_eq!(plan.tokens_per_wallet, 3);
        assert!((plan.estimated_duration_secs - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cost_saturates() {
        let cost = CostModel {
            fixed_fee_lamports: u64::MAX,
            gas_price: u64::MAX,
            gas_per_operation: u64::MAX,
            per_operation_secs: 1.0,
        };
        let plan = plan(&targets(3), &wallets(1), 3, &cost).unwrap();
        assert_eq!(plan.estimated_cost_lamports, u64::MAX);
    }
}
