// ── Result Structs ──────────────────────────────────────────────────

/// Two-sided 95% critical value used for confidence intervals.
pub const Z_CRITICAL_95: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZTestResult {
    pub z_score: f64,
    pub p_value: f64,
    pub significant: bool,
    /// Bounds of the 95% interval for p1 - p2.
    pub ci_lower: f64,
    pub ci_upper: f64,
}

impl ZTestResult {
    fn degenerate(ci_center: f64) -> Self {
        Self {
            z_score: 0.0,
            p_value: 1.0,
            significant: false,
            ci_lower: ci_center,
            ci_upper: ci_center,
        }
    }
}

// ── Normal Survival Function (A&S 26.2.17 with Horner's method) ─────

/// Computes P(Z > z) for the standard normal distribution.
/// Uses Abramowitz & Stegun 26.2.17 rational approximation with Horner's method.
/// Caller must pass z >= 0 (use z.abs() before calling).
pub fn normal_sf(z: f64) -> f64 {
    debug_assert!(z >= 0.0, "normal_sf requires z >= 0, got {}", z);

    let t = 1.0 / (1.0 + 0.2316419 * z);
    let d = 0.3989422804014327; // 1/sqrt(2*pi)
    let p = d * (-z * z / 2.0).exp();

    let poly = t
        * (0.319381530
            + t * (-0.356563782 + t * (1.781477937 + t * (-1.821255978 + t * 1.330274429))));

    p * poly
}

/// Two-tailed p-value for a z statistic.
pub fn two_tailed_p(z: f64) -> f64 {
    (2.0 * normal_sf(z.abs())).clamp(0.0, 1.0)
}

// ── Two-Proportion Z-Test ───────────────────────────────────────────

/// Pooled two-proportion z-test of `successes_1 / trials_1` against
/// `successes_2 / trials_2`. Significant when p < 1 - confidence_level.
///
/// Either arm with zero trials yields z = 0, p = 1 and an empty interval.
/// A zero standard error (both arms all-success or all-failure) yields
/// z = 0, p = 1 and an interval collapsed onto the observed difference.
pub fn two_proportion_z_test(
    successes_1: u64,
    trials_1: u64,
    successes_2: u64,
    trials_2: u64,
    confidence_level: f64,
) -> ZTestResult {
    if trials_1 == 0 || trials_2 == 0 {
        return ZTestResult::degenerate(0.0);
    }

    let n1 = trials_1 as f64;
    let n2 = trials_2 as f64;
    let p1 = successes_1 as f64 / n1;
    let p2 = successes_2 as f64 / n2;
    let pooled = (successes_1 + successes_2) as f64 / (n1 + n2);

    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    let diff = p1 - p2;

    if se == 0.0 || !se.is_finite() {
        return ZTestResult::degenerate(diff);
    }

    let z = diff / se;
    let p_value = two_tailed_p(z);
    let margin = Z_CRITICAL_95 * se;

    ZTestResult {
        z_score: z,
        p_value,
        significant: p_value < (1.0 - confidence_level),
        ci_lower: diff - margin,
        ci_upper: diff + margin,
    }
}

// ── Cost-Per-Click Comparison ───────────────────────────────────────

/// Relative CPC reduction of `best_cpc` against `control_cpc`.
/// Returns 0 when the control CPC is not positive.
pub fn cpc_improvement(best_cpc: f64, control_cpc: f64) -> f64 {
    if control_cpc <= 0.0 {
        return 0.0;
    }
    (control_cpc - best_cpc) / control_cpc
}
