//! Per-patch vertex budget for triangle-domain tessellation.
//!
//! Tessellated vertices of every patch are written into a shared flat buffer,
//! each patch owning a slice of `max_vertices_per_patch(factor)` entries. The
//! budget is rounded up to a prime so it can double as a scatter stride.

/// Smallest tessellation factor the renderer accepts.
pub const MIN_TESS_FACTOR: u32 = 1;
/// Largest tessellation factor the renderer accepts. Budget-dependent buffers
/// are allocated for this factor.
pub const MAX_TESS_FACTOR: u32 = 16;

/// Primality test for `n >= 2`.
pub fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    let mut i = 2u32;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 1;
    }
    true
}

/// Smallest prime `>= n`.
pub fn next_prime(n: u32) -> u32 {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

/// Vertex count of a triangle domain tessellated with an integer factor.
///
/// Odd factors produce `3k²` vertices, even factors `3k(k-1) + 1`, with
/// `k = factor / 2 + 1`.
pub fn triangle_domain_vertices(tess_factor: u32) -> u32 {
    let k = tess_factor / 2 + 1;
    if tess_factor & 1 == 1 {
        3 * k * k
    } else {
        3 * k * (k - 1) + 1
    }
}

/// Upper bound on the vertices one patch can emit: the smallest prime not
/// below the triangle-domain vertex count.
pub fn max_vertices_per_patch(tess_factor: u32) -> u32 {
    next_prime(triangle_domain_vertices(tess_factor))
}

/// Clamp a requested factor into the supported range.
pub fn clamp_tess_factor(tess_factor: u32) -> u32 {
    tess_factor.clamp(MIN_TESS_FACTOR, MAX_TESS_FACTOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_budgets() {
        // f=2: k=2, 3*2*1+1 = 7
        assert_eq!(max_vertices_per_patch(2), 7);
        // f=3: k=2, 3*4 = 12 -> 13
        assert_eq!(max_vertices_per_patch(3), 13);
        assert_eq!(max_vertices_per_patch(1), 3);
        assert_eq!(max_vertices_per_patch(4), 19);
    }

    #[test]
    fn test_budget_is_prime_monotonic_and_bounding() {
        let mut previous = 0;
        for factor in MIN_TESS_FACTOR..=64 {
            let budget = max_vertices_per_patch(factor);
            assert!(is_prime(budget), "budget {budget} for factor {factor} is not prime");
            assert!(budget >= triangle_domain_vertices(factor));
            assert!(budget >= previous, "budget decreased at factor {factor}");
            assert_eq!(budget, max_vertices_per_patch(factor));
            previous = budget;
        }
    }

    #[test]
    fn test_primes() {
        let primes: Vec<u32> = (0..30).filter(|&n| is_prime(n)).collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
        assert_eq!(next_prime(0), 2);
        assert_eq!(next_prime(24), 29);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_tess_factor(0), MIN_TESS_FACTOR);
        assert_eq!(clamp_tess_factor(100), MAX_TESS_FACTOR);
        assert_eq!(clamp_tess_factor(5), 5);
    }
}
