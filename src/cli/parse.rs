use std::{fmt::Display, ops::RangeInclusive, str::FromStr};

pub fn parse_range_inclusive<N: PartialEq + PartialOrd + FromStr + Display>(
    s: &str,
    range: RangeInclusive<N>,
) -> Result<N, String> {
    let value: N = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "{value} is outside {}-{}",
            range.start(),
            range.end(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::parse_range_inclusive;

    #[test]
    fn levels_are_bounded() {
        assert_eq!(parse_range_inclusive::<u8>("3", 1..=22), Ok(3));
        assert_eq!(
            parse_range_inclusive::<u8>("23", 1..=22),
            Err("23 is outside 1-22".to_owned())
        );
        assert!(parse_range_inclusive::<u8>("fast", 1..=22).is_err());
    }
}
