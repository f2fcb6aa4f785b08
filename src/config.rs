use crate::error::Error;

/// Validated engine parameters shared by sender and receiver.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub mtu: u32,
    pub window: u32,
}

impl Config {
    pub fn new(mtu: u32, window: u32) -> Result<Self, Error> {
        if mtu == 0 {
            return Err(Error::Config("mtu must be non-zero".into()));
        }
        if mtu >= (1 << 29) {
            return Err(Error::Config("mtu exceeds the 29-bit length field".into()));
        }
        if window == 0 {
            return Err(Error::Config("window must be non-zero".into()));
        }

        Ok(Config { mtu, window })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_mtu() {
        assert!(Config::new(0, 8).is_err());
    }

    #[test]
    fn rejects_zero_window() {
        assert!(Config::new(1500, 0).is_err());
    }

    #[test]
    fn accepts_sane_values() {
        assert!(Config::new(1500, 8).is_ok());
    }
}
