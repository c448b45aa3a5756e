//! Detection of system-specific dump headers that must be stripped
//! before content addressing.

/// One signature to match: fixed bytes at a fixed offset.
#[derive(Debug)]
pub struct HeaderRule {
    pub offset: usize,
    pub magic: &'static [u8],
}

/// A known header format. All rules must match for the format to apply.
#[derive(Debug)]
pub struct HeaderFormat {
    pub system: &'static str,
    pub extension: &'static str,
    pub rules: &'static [HeaderRule],
    /// Header length in bytes.
    pub size: u64,
}

impl HeaderFormat {
    fn matches(&self, sample: &[u8]) -> bool {
        self.rules.iter().all(|rule| {
            sample
                .get(rule.offset..rule.offset + rule.magic.len())
                .is_some_and(|bytes| bytes == rule.magic)
        })
    }
}

pub static FORMATS: &[HeaderFormat] = &[
    HeaderFormat {
        system: "Famicom Disk System",
        extension: "fds",
        rules: &[HeaderRule {
            offset: 0,
            magic: b"FDS",
        }],
        size: 16,
    },
    HeaderFormat {
        system: "Nintendo Entertainment System",
        extension: "nes",
        rules: &[HeaderRule {
            offset: 0,
            magic: b"NES",
        }],
        size: 16,
    },
    HeaderFormat {
        system: "Atari Lynx",
        extension: "lnx",
        rules: &[HeaderRule {
            offset: 0,
            magic: b"LYNX",
        }],
        size: 64,
    },
    HeaderFormat {
        system: "Atari 7800",
        extension: "a78",
        rules: &[
            HeaderRule {
                offset: 1,
                magic: b"ATARI7800",
            },
            HeaderRule {
                offset: 96,
                magic: b"ACTUAL CART DATA STARTS HERE",
            },
        ],
        size: 128,
    },
];

/// First matching format wins. A rule reaching past the sample fails
/// that format, so truncated samples degrade to "no header" instead of
/// an error.
pub fn detect(sample: &[u8]) -> Option<&'static HeaderFormat> {
    FORMATS.iter().find(|format| format.matches(sample))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_nes() {
        let mut sample = b"NES\x1a".to_vec();
        sample.extend_from_slice(&[0u8; 64]);
        let format = detect(&sample).unwrap();
        assert_eq!(format.extension, "nes");
        assert_eq!(format.size, 16);
    }

    #[test]
    fn detects_lynx() {
        let sample = b"LYNX followed by anything".to_vec();
        assert_eq!(detect(&sample).unwrap().size, 64);
    }

    #[test]
    fn atari7800_needs_both_rules() {
        let mut sample = vec![0u8; 200];
        sample[1..10].copy_from_slice(b"ATARI7800");
        assert!(detect(&sample).is_none());

        sample[96..124].copy_from_slice(b"ACTUAL CART DATA STARTS HERE");
        assert_eq!(detect(&sample).unwrap().size, 128);
    }

    #[test]
    fn short_sample_is_unheadered() {
        // The 7800 signature demands byte 96; a shorter sample must not
        // match and must not error.
        let mut sample = vec![0u8; 40];
        sample[1..10].copy_from_slice(b"ATARI7800");
        assert!(detect(&sample).is_none());
        assert!(detect(b"").is_none());
    }
}
