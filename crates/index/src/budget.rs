//! Proportional allocation of the fine-centroid budget across coarse partitions.
//!
//! Both strategies use exact integer arithmetic, so the allocation always sums
//! to the requested total and every partition receives the floor or the
//! ceiling of its proportional quota `size * total / n`.

use bivf_core::{AllocationStrategy, ClusterError, ClusterResult};

/// Split `total` centroids across partitions proportionally to `sizes`.
///
/// Partitions with no vectors always receive 0. Any partition may receive 0
/// when its quota is below one.
pub fn allocate_budget(
    sizes: &[usize],
    total: usize,
    strategy: AllocationStrategy,
) -> ClusterResult<Vec<usize>> {
    let n: usize = sizes.iter().sum();
    if n == 0 {
        return Err(ClusterError::InvalidClusterCount { k: total, n });
    }

    let budget = match strategy {
        AllocationStrategy::LargestRemainder => largest_remainder(sizes, total, n),
        AllocationStrategy::Cumulative => cumulative(sizes, total, n),
    };
    Ok(budget)
}

/// Check that a budget sums exactly to `total`.
pub fn verify_budget(budget: &[usize], total: usize) -> ClusterResult<()> {
    let got: usize = budget.iter().sum();
    if got != total {
        return Err(ClusterError::BudgetInvariantViolation {
            expected: total,
            got,
        });
    }
    Ok(())
}

/// Floor of each quota, then one extra unit to each of the largest remainders.
///
/// Ties in remainder go to the larger partition, then to the lower index.
/// A strictly larger partition has a strictly larger quota, hence either a
/// larger floor or the same floor and a larger remainder; the result is
/// monotonic in partition size.
fn largest_remainder(sizes: &[usize], total: usize, n: usize) -> Vec<usize> {
    let (n, t) = (n as u128, total as u128);
    let mut budget = Vec::with_capacity(sizes.len());
    let mut remainders = Vec::with_capacity(sizes.len());

    for (i, &s) in sizes.iter().enumerate() {
        let scaled = s as u128 * t;
        budget.push((scaled / n) as usize);
        remainders.push((scaled % n, s, i));
    }

    let assigned: usize = budget.iter().sum();
    let leftover = total - assigned;
    if leftover > 0 {
        remainders.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
        for &(_, _, i) in remainders.iter().take(leftover) {
            budget[i] += 1;
        }
    }
    budget
}

/// Scale cumulative sizes by `total / n` with floor division, then take
/// successive differences. The last cumulative value scales to `total`
/// exactly.
fn cumulative(sizes: &[usize], total: usize, n: usize) -> Vec<usize> {
    let (n, t) = (n as u128, total as u128);
    let mut budget = Vec::with_capacity(sizes.len());
    let mut cum = 0u128;
    let mut prev = 0usize;
    for &s in sizes {
        cum += s as u128;
        let scaled = (cum * t / n) as usize;
        budget.push(scaled - prev);
        prev = scaled;
    }
    budget
}
