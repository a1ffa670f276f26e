//! Zero-gamma (flip) level.

/// Find the interpolated price at which net GEX crosses zero.
///
/// `profile` is `(strike, net_gex)` ordered by strike ascending. The first
/// adjacent pair whose values have opposite sign, or where either is exactly
/// zero, determines the level:
///
/// - left value zero: the left strike itself
/// - both values zero: undefined
/// - otherwise: `s_i + (s_j - s_i) * (-n_i) / (n_j - n_i)`
///
/// Returns `None` when the profile never changes sign.
#[must_use]
pub fn zero_gamma_level(profile: &[(f64, f64)]) -> Option<f64> {
    for pair in profile.windows(2) {
        let (lower_strike, lower_net) = pair[0];
        let (upper_strike, upper_net) = pair[1];

        if lower_net == 0.0 {
            if upper_net == 0.0 {
                return None;
            }
            return Some(lower_strike);
        }

        let crosses = (lower_net < 0.0) != (upper_net < 0.0) || upper_net == 0.0;
        if crosses {
            let fraction = -lower_net / (upper_net - lower_net);
            return Some((upper_strike - lower_strike).mul_add(fraction, lower_strike));
        }
    }

    None
}
