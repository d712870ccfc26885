use crate::error::DriverError;
use std::net::Ipv4Addr;

/// Converts a dotted-quad IPv4 netmask into a CIDR prefix length.
pub fn prefix_len(netmask: &str) -> Result<u8, DriverError> {
    let mask: Ipv4Addr = netmask
        .parse()
        .map_err(|_| DriverError::InvalidNetmask(netmask.to_string()))?;
    Ok(u32::from(mask).count_ones() as u8)
}

/// Formats `<address>/<prefix-length>` from an address and a dotted-quad
/// netmask, as the provisioning Workflow expects for its CIDR parameter.
pub fn to_cidr(address: &str, netmask: &str) -> Result<String, DriverError> {
    let prefix = prefix_len(netmask)?;
    Ok(format!("{address}/{prefix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_24() {
        assert_eq!(prefix_len("255.255.255.0").unwrap(), 24);
    }

    #[test]
    fn slash_16() {
        assert_eq!(prefix_len("255.255.0.0").unwrap(), 16);
    }

    #[test]
    fn cidr_format() {
        assert_eq!(
            to_cidr("192.168.1.10", "255.255.255.0").unwrap(),
            "192.168.1.10/24"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(prefix_len("not-an-ip").is_err());
    }
}
