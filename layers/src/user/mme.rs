//! NAS procedure variables of a user

use crate::LayerError;

/// EMM cause: IMSI unknown in HSS
pub const EMM_CAUSE_IMSI_UNKNOWN_IN_HSS: u8 = 0x02;
/// EMM cause: roaming not allowed in this tracking area
pub const EMM_CAUSE_ROAMING_NOT_ALLOWED_IN_THIS_TRACKING_AREA: u8 = 0x0D;

/// Maximum number of protocol configuration options in one container
pub const MAX_PROTOCOL_CONFIG_OPTIONS: usize = 83;

/// One protocol configuration option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfigOption {
    pub id: u16,
    pub contents: Vec<u8>,
}

/// Protocol configuration options received from the device
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtocolConfigOptions {
    opts: Vec<ProtocolConfigOption>,
}

impl ProtocolConfigOptions {
    /// Append an option, failing once the container is full
    pub fn push(&mut self, opt: ProtocolConfigOption) -> Result<(), LayerError> {
        if self.opts.len() >= MAX_PROTOCOL_CONFIG_OPTIONS {
            return Err(LayerError::IndexOutOfRange {
                index: self.opts.len(),
                max: MAX_PROTOCOL_CONFIG_OPTIONS - 1,
            });
        }
        self.opts.push(opt);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtocolConfigOption> {
        self.opts.iter()
    }

    pub fn len(&self) -> usize {
        self.opts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opts.is_empty()
    }

    pub fn clear(&mut self) {
        self.opts.clear();
    }
}

/// NAS procedure variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmeContext {
    pub emm_cause: u8,
    pub attach_type: u8,
    pub pdn_type: u8,
    pub eps_bearer_id: u8,
    pub proc_transaction_id: u8,
    /// ESM information transfer flag
    pub esm_info_transfer: bool,
    pub protocol_cnfg_opts: ProtocolConfigOptions,
}

impl MmeContext {
    /// Variables of a freshly created context
    pub fn new() -> Self {
        Self {
            emm_cause: EMM_CAUSE_IMSI_UNKNOWN_IN_HSS,
            attach_type: 0,
            pdn_type: 0,
            eps_bearer_id: 0,
            proc_transaction_id: 0,
            esm_info_transfer: false,
            protocol_cnfg_opts: ProtocolConfigOptions::default(),
        }
    }

    /// Variables after a context reset
    ///
    /// The default cause differs from a fresh context. The ESM information
    /// transfer flag survives the reset.
    pub fn reset(&mut self) {
        *self = Self {
            emm_cause: EMM_CAUSE_ROAMING_NOT_ALLOWED_IN_THIS_TRACKING_AREA,
            esm_info_transfer: self.esm_info_transfer,
            ..Self::new()
        };
    }
}

impl Default for MmeContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_cause_differs_from_new() {
        let mut mme = MmeContext::new();
        assert_eq!(mme.emm_cause, EMM_CAUSE_IMSI_UNKNOWN_IN_HSS);

        mme.eps_bearer_id = 5;
        mme.reset();
        assert_eq!(mme.emm_cause, EMM_CAUSE_ROAMING_NOT_ALLOWED_IN_THIS_TRACKING_AREA);
        assert_eq!(mme.eps_bearer_id, 0);
    }

    #[test]
    fn test_reset_keeps_esm_info_transfer() {
        let mut mme = MmeContext::new();
        mme.esm_info_transfer = true;
        mme.attach_type = 2;
        mme.protocol_cnfg_opts
            .push(ProtocolConfigOption { id: 0x000d, contents: vec![] })
            .unwrap();

        mme.reset();
        assert!(mme.esm_info_transfer);
        assert_eq!(mme.attach_type, 0);
        assert!(mme.protocol_cnfg_opts.is_empty());
    }

    #[test]
    fn test_protocol_config_options_bound() {
        let mut opts = ProtocolConfigOptions::default();
        for id in 0..MAX_PROTOCOL_CONFIG_OPTIONS {
            opts.push(ProtocolConfigOption {
                id: id as u16,
                contents: vec![],
            })
            .unwrap();
        }
        assert!(matches!(
            opts.push(ProtocolConfigOption { id: 0, contents: vec![] }),
            Err(LayerError::IndexOutOfRange { .. })
        ));
        assert_eq!(opts.len(), MAX_PROTOCOL_CONFIG_OPTIONS);
    }
}
