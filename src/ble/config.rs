use bt_hci::param::{AddrKind, BdAddr};
use trouble_host::{Address, HostResources};

const L2CAP_MTU: usize = 255;
const CONNECTIONS_MAX: usize = 1;
const L2CAP_CHANNELS_MAX: usize = 2;

pub type Resources = HostResources<CONNECTIONS_MAX, L2CAP_CHANNELS_MAX, L2CAP_MTU>;

pub struct Config {
    /// Advertised device name
    pub name: &'static str,

    /// Static random address of the device
    pub address: Address,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "Sensorgate",
            address: Address {
                kind: AddrKind::RANDOM,
                addr: BdAddr::new([0x52, 0x47, 0x34, 0x80, 0x22, 0xc2]),
            },
        }
    }
}
