use std::{net::Ipv4Addr, str::FromStr};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::FormationError;

/// Upper bound on the number of sub-blocks a single block may be divided into.
pub const MAX_DIVISIONS: usize = 4;

// Sub-blocks are eighths of the base block.
const DIVISION_PREFIX_STEP: u8 = 3;

/// IPv4 network range with host bits cleared.
///
/// Ordering is numeric on the network address, then on the prefix length, and
/// the `Display` form (`10.0.3.0/24`) is the canonical form stored in stack
/// tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressBlock(Ipv4Net);

impl AddressBlock {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, FormationError> {
        let net = Ipv4Net::new(addr, prefix_len).map_err(|_| {
            FormationError::invalid_argument(format!("invalid prefix length: {prefix_len}"))
        })?;
        Ok(Self(net.trunc()))
    }

    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn contains(&self, other: &AddressBlock) -> bool {
        self.0.contains(&other.0)
    }

    pub fn overlaps(&self, other: &AddressBlock) -> bool {
        self.0.contains(&other.0.network()) || other.0.contains(&self.0.network())
    }

    /// All sub-blocks of length `prefix_len`, in ascending order.
    pub fn subnets(
        &self,
        prefix_len: u8,
    ) -> Result<impl Iterator<Item = AddressBlock>, FormationError> {
        let subnets = self.0.subnets(prefix_len).map_err(|_| {
            FormationError::invalid_argument(format!(
                "cannot split {self} into /{prefix_len} blocks"
            ))
        })?;
        Ok(subnets.map(AddressBlock))
    }
}

impl std::fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.0.network(), self.0.prefix_len())
    }
}

impl FromStr for AddressBlock {
    type Err = FormationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net = Ipv4Net::from_str(s.trim()).map_err(|e| {
            FormationError::invalid_argument(format!("malformed address block {s:?}: {e}"))
        })?;
        Ok(Self(net.trunc()))
    }
}

impl TryFrom<String> for AddressBlock {
    type Error = FormationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AddressBlock> for String {
    fn from(value: AddressBlock) -> Self {
        value.to_string()
    }
}

/// Splits `base` into `count` equal, disjoint sub-blocks.
///
/// Each sub-block is one eighth of `base`, laid out from the start of the
/// range: `10.0.0.0/24` divided by 4 yields the `/27`s at `.0`, `.32`, `.64`
/// and `.96`.
pub fn divide(base: &AddressBlock, count: usize) -> Result<Vec<AddressBlock>, FormationError> {
    if count > MAX_DIVISIONS {
        return Err(FormationError::invalid_argument(format!(
            "too many divisions: {count} (max {MAX_DIVISIONS})"
        )));
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    let prefix_len = base.prefix_len() + DIVISION_PREFIX_STEP;
    if prefix_len > 32 {
        return Err(FormationError::invalid_argument(format!(
            "address block {base} is too small to divide"
        )));
    }

    Ok(base.subnets(prefix_len)?.take(count).collect())
}

/// String form of [`divide`], for callers holding a tag value.
pub fn divide_str(base: &str, count: usize) -> Result<Vec<AddressBlock>, FormationError> {
    divide(&base.parse()?, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn block(s: &str) -> AddressBlock {
        s.parse().unwrap()
    }

    fn strings(blocks: &[AddressBlock]) -> Vec<String> {
        blocks.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn divides_24_into_four_27s() {
        let out = divide(&block("10.0.0.0/24"), 4).unwrap();
        assert_eq!(
            strings(&out),
            vec![
                "10.0.0.0/27",
                "10.0.0.32/27",
                "10.0.0.64/27",
                "10.0.0.96/27"
            ]
        );
    }

    #[test]
    fn zero_divisions_is_empty_not_error() {
        assert_eq!(divide(&block("10.0.7.0/24"), 0).unwrap(), Vec::new());
    }

    #[test]
    fn rejects_more_than_max_divisions() {
        let err = divide(&block("10.0.0.0/24"), MAX_DIVISIONS + 1).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
        assert!(err.to_string().contains("too many divisions"));
    }

    #[test]
    fn sub_blocks_are_disjoint_and_contained() {
        for base in ["10.0.0.0/24", "10.0.12.0/24", "172.16.0.0/16", "192.168.4.0/29"] {
            let base = block(base);
            for n in 0..=MAX_DIVISIONS {
                let out = divide(&base, n).unwrap();
                assert_eq!(out.len(), n);
                for (i, a) in out.iter().enumerate() {
                    assert!(base.contains(a), "{a} not in {base}");
                    for b in &out[i + 1..] {
                        assert!(!a.overlaps(b), "{a} overlaps {b}");
                    }
                }
            }
        }
    }

    #[test]
    fn divide_is_deterministic() {
        let base = block("10.0.42.0/24");
        assert_eq!(divide(&base, 3).unwrap(), divide(&base, 3).unwrap());
    }

    #[test]
    fn rejects_blocks_too_small_to_divide() {
        let err = divide(&block("10.0.0.0/30"), 1).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn divide_str_rejects_malformed_base() {
        assert_eq!(
            divide_str("10.0.0/24", 2).unwrap_err().code(),
            "invalid_argument"
        );
        assert_eq!(
            divide_str("not-a-block", 0).unwrap_err().code(),
            "invalid_argument"
        );
        assert_eq!(divide_str("10.0.3.0/24", 1).unwrap(), vec![block("10.0.3.0/27")]);
    }

    #[test]
    fn parse_normalizes_host_bits_and_orders_numerically() {
        assert_eq!(block("10.0.3.17/24").to_string(), "10.0.3.0/24");
        assert!(block("10.0.2.0/24") < block("10.0.10.0/24"));
    }

    #[test]
    fn overlap_covers_nested_blocks() {
        assert!(block("10.0.5.0/24").overlaps(&block("10.0.5.128/25")));
        assert!(block("10.0.5.128/25").overlaps(&block("10.0.5.0/24")));
        assert!(!block("10.0.5.0/24").overlaps(&block("10.0.6.0/24")));
    }

    #[test]
    fn serde_uses_canonical_string() {
        let json = serde_json::to_string(&block("10.0.9.0/24")).unwrap();
        assert_eq!(json, "\"10.0.9.0/24\"");
        let back: AddressBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block("10.0.9.0/24"));
        assert!(serde_json::from_str::<AddressBlock>("\"10.0.9.0\"").is_err());
    }
}
