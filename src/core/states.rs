//! Flat approximations of state income tax, keyed by postal code.

const STATE_RATES: [(&str, f64); 51] = [
    ("AK", 0.0),
    ("AL", 0.05),
    ("AR", 0.039),
    ("AZ", 0.025),
    ("CA", 0.093),
    ("CO", 0.044),
    ("CT", 0.055),
    ("DC", 0.085),
    ("DE", 0.066),
    ("FL", 0.0),
    ("GA", 0.0539),
    ("HI", 0.0825),
    ("IA", 0.038),
    ("ID", 0.057),
    ("IL", 0.0495),
    ("IN", 0.0305),
    ("KS", 0.0558),
    ("KY", 0.04),
    ("LA", 0.03),
    ("MA", 0.05),
    ("MD", 0.0575),
    ("ME", 0.0715),
    ("MI", 0.0425),
    ("MN", 0.0785),
    ("MO", 0.047),
    ("MS", 0.044),
    ("MT", 0.059),
    ("NC", 0.0425),
    ("ND", 0.025),
    ("NE", 0.052),
    ("NH", 0.0),
    ("NJ", 0.0637),
    ("NM", 0.049),
    ("NV", 0.0),
    ("NY", 0.0685),
    ("OH", 0.035),
    ("OK", 0.0475),
    ("OR", 0.0875),
    ("PA", 0.0307),
    ("RI", 0.0599),
    ("SC", 0.062),
    ("SD", 0.0),
    ("TN", 0.0),
    ("TX", 0.0),
    ("UT", 0.0455),
    ("VA", 0.0575),
    ("VT", 0.0875),
    ("WA", 0.0),
    ("WI", 0.0627),
    ("WV", 0.0482),
    ("WY", 0.0),
];

/// Flat rate for a two-letter state code; unknown or empty codes are untaxed.
pub fn state_rate(code: &str) -> f64 {
    let code = code.trim();
    STATE_RATES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, rate)| *rate)
        .unwrap_or(0.0)
}
