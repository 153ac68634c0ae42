//! NAS security context

use tracing::trace;

/// Largest NAS COUNT value, 16 bit overflow counter plus 8 bit sequence number
pub const NAS_COUNT_MAX: u32 = 0x00FF_FFFF;

/// Authentication vector and derived NAS keys of one user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthVector {
    /// Authentication challenge
    pub rand: [u8; 16],
    /// Network authentication token
    pub autn: [u8; 16],
    /// Expected response
    pub xres: [u8; 16],
    /// Length of `xres` in bytes
    pub xres_len: usize,
    /// Access security management entity key
    pub k_asme: [u8; 32],
    /// NAS encryption key
    pub k_nas_enc: [u8; 32],
    /// NAS integrity key
    pub k_nas_int: [u8; 32],
    /// Uplink NAS COUNT
    nas_count_ul: u32,
    /// Downlink NAS COUNT
    nas_count_dl: u32,
}

impl AuthVector {
    pub fn nas_count_ul(&self) -> u32 {
        self.nas_count_ul
    }

    pub fn nas_count_dl(&self) -> u32 {
        self.nas_count_dl
    }

    /// Advance the uplink count, `false` once the count space is exhausted
    pub fn increment_ul(&mut self) -> bool {
        advance(&mut self.nas_count_ul)
    }

    /// Advance the downlink count, `false` once the count space is exhausted
    pub fn increment_dl(&mut self) -> bool {
        advance(&mut self.nas_count_dl)
    }
}

fn advance(count: &mut u32) -> bool {
    if *count >= NAS_COUNT_MAX {
        return false;
    }
    *count += 1;
    trace!("NAS COUNT now {}", *count);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_are_independent() {
        let mut av = AuthVector::default();
        assert!(av.increment_ul());
        assert!(av.increment_ul());
        assert!(av.increment_dl());
        assert_eq!(av.nas_count_ul(), 2);
        assert_eq!(av.nas_count_dl(), 1);
    }

    #[test]
    fn test_count_never_wraps() {
        let mut av = AuthVector {
            nas_count_ul: NAS_COUNT_MAX - 1,
            ..Default::default()
        };
        assert!(av.increment_ul());
        assert!(!av.increment_ul());
        assert_eq!(av.nas_count_ul(), NAS_COUNT_MAX);
    }
}
