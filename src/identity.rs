use std::{fmt, str::FromStr};

use advmac::MacAddr6;
use compact_str::CompactString;
use rand::Rng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Xen vendor prefix carried by every simulated client.
pub const VENDOR_PREFIX: [u8; 3] = [0x00, 0x16, 0x3e];

/// Simulated hardware address of a single client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientIdentity(MacAddr6);

impl ClientIdentity {
    pub fn octets(&self) -> [u8; 6] {
        self.0.to_array()
    }
}

/// Draw a fresh identity: the fixed vendor prefix followed by three random octets.
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> ClientIdentity {
    let [a, b, c] = VENDOR_PREFIX;
    let [d, e, f]: [u8; 3] = rng.gen();
    ClientIdentity(MacAddr6::new([a, b, c, d, e, f]))
}

impl From<MacAddr6> for ClientIdentity {
    fn from(mac: MacAddr6) -> Self {
        Self(mac)
    }
}

// lowercase colon notation, which is what the leasing server keys on
impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for ClientIdentity {
    type Err = advmac::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MacAddr6::from_str(s).map(Self)
    }
}

impl Serialize for ClientIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClientIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = CompactString::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn is_colon_hex(s: &str) -> bool {
        let groups: Vec<&str> = s.split(':').collect();
        groups.len() == 6
            && groups.iter().all(|g| {
                g.len() == 2 && g.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
            })
    }

    #[test]
    fn generated_identities_carry_vendor_prefix() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..256 {
            let id = generate(&mut rng);
            assert_eq!(id.octets()[..3], VENDOR_PREFIX);
            assert!(id.to_string().starts_with("00:16:3e:"));
        }
    }

    #[test]
    fn rendering_is_lowercase_colon_hex() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..256 {
            let rendered = generate(&mut rng).to_string();
            assert!(is_colon_hex(&rendered), "bad rendering {rendered}");
        }

        let id = ClientIdentity::from(MacAddr6::new([0x00, 0x16, 0x3e, 0xab, 0x0c, 0xff]));
        assert_eq!(id.to_string(), "00:16:3e:ab:0c:ff");
    }

    #[test]
    fn seeded_sources_are_deterministic() {
        let a = generate(&mut StdRng::seed_from_u64(99));
        let b = generate(&mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
    }

    #[test]
    fn parses_its_own_rendering() {
        let id = generate(&mut StdRng::seed_from_u64(3));
        let parsed: ClientIdentity = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-mac".parse::<ClientIdentity>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ClientIdentity::from(MacAddr6::new([0x00, 0x16, 0x3e, 0x01, 0x02, 0x03]));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"00:16:3e:01:02:03\"");
    }
}
