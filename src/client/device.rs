//! Opening the TUN device a client tunnels.

use std::net::Ipv4Addr;

use tun::{configure, AsyncDevice};

use crate::error::TunnelError;

/// Name given to the TUN device when none is specified.
pub const DEFAULT_DEVICE_NAME: &str = "hubtun0";

/// Largest MTU a device may be given: the size of a packet read from it.
pub const MAX_MTU: u16 = 2048;

/// TUN device configuration.
///
/// Anything left unset stays as the host configures it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Device name, e.g. "hubtun0".
    pub name: String,
    pub address: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub mtu: Option<u16>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DEVICE_NAME.to_string(),
            address: None,
            netmask: None,
            mtu: None,
        }
    }
}

impl DeviceConfig {
    fn to_configuration(&self) -> tun::Configuration {
        let mut configuration = configure();
        configuration.name(&self.name).up();
        if let Some(address) = self.address {
            configuration.address(address);
        }
        if let Some(netmask) = self.netmask {
            configuration.netmask(netmask);
        }
        if let Some(mtu) = self.mtu {
            configuration.mtu(i32::from(mtu));
        }

        // Reads and writes must carry bare IP packets.
        #[cfg(target_os = "linux")]
        configuration.platform(|platform| {
            platform.packet_information(false);
        });

        configuration
    }
}

/// Creates the TUN device described by `config` and brings it up.
pub fn open(config: &DeviceConfig) -> Result<AsyncDevice, TunnelError> {
    if let Some(mtu) = config.mtu.filter(|&mtu| mtu > MAX_MTU) {
        return Err(TunnelError::MtuTooLarge(mtu));
    }
    let device = tun::create_as_async(&config.to_configuration())?;
    Ok(device)
}
