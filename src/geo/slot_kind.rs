use std::fmt;

/// The closed set of logical databases the service can hold
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SlotKind {
    Country,
    CityIpv4,
    CityIpv6,
}

/// Level of detail a slot provides
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Tier {
    Country,
    City,
}

impl SlotKind {
    pub const ALL: [SlotKind; 3] = [Self::Country, Self::CityIpv4, Self::CityIpv6];

    pub fn tier(self) -> Tier {
        match self {
            Self::Country => Tier::Country,
            Self::CityIpv4 | Self::CityIpv6 => Tier::City,
        }
    }
}

impl From<SlotKind> for &'static str {
    fn from(kind: SlotKind) -> Self {
        match kind {
            SlotKind::Country => "country",
            SlotKind::CityIpv4 => "city-ipv4",
            SlotKind::CityIpv6 => "city-ipv6",
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).into())
    }
}
