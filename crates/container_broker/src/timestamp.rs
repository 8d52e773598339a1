/// Renders an internal timestamp (seconds since epoch, sub-second precision)
/// the way it is exchanged in headers and listings: fixed five decimal
/// places, so two brokers comparing the same timestamp as text agree.
pub fn format_timestamp(ts: f64) -> String {
    format!("{ts:.5}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_five_decimal_places() {
        assert_eq!(format_timestamp(100.0), "100.00000");
        assert_eq!(format_timestamp(100.5), "100.50000");
    }
}
