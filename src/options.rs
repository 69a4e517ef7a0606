//! Evasion option flags and the `method=` name table.
use bitflags::bitflags;

bitflags! {
    /// 32-bit flag set. Bit positions are part of the wire contract for
    /// introspection/PAC use, though never emitted on the wire themselves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Options: u32 {
        const TTL        = 1 << 0;
        const MSS        = 1 << 1;
        const WMD5       = 1 << 2;
        const NACK       = 1 << 3;
        const WACK       = 1 << 4;
        const WCSUM      = 1 << 5;
        const WSEQ       = 1 << 6;
        const WTIME      = 1 << 7;
        const TFO        = 1 << 8;
        const HTFO       = 1 << 9;
        const KEEPALIVE  = 1 << 10;
        const SYNX2      = 1 << 11;
        const HTTP       = 1 << 16;
        const HTTPS      = 1 << 17;
        const MOVE       = 1 << 18;
        const STRIP      = 1 << 19;
        const IPV4       = 1 << 20;
        const IPV6       = 1 << 21;
        const MODE2      = 1 << 22;
        const DF         = 1 << 23;
        const SAT        = 1 << 24;
        const RAND       = 1 << 25;
        const SSEG       = 1 << 26;
        const ONESEG     = 1 << 27;
        const PROXY      = 1 << 31;

        const FAKE = Self::TTL.bits() | Self::WMD5.bits() | Self::NACK.bits()
            | Self::WACK.bits() | Self::WCSUM.bits() | Self::WSEQ.bits() | Self::WTIME.bits();
        const MODIFY = Self::FAKE.bits() | Self::SSEG.bits() | Self::TFO.bits()
            | Self::HTFO.bits() | Self::MODE2.bits();
    }
}

impl Options {
    /// Parse a comma-separated list of method names (the `method=` config
    /// directive) into a flag set. Unknown names are reported to the
    /// caller, which logs and continues rather than aborting the load.
    pub fn from_method_csv(csv: &str) -> (Options, Vec<String>) {
        let mut opts = Options::empty();
        let mut unknown = Vec::new();
        for name in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match method_name_to_option(name) {
                Some(o) => opts |= o,
                None => unknown.push(name.to_string()),
            }
        }
        (opts, unknown)
    }
}

fn method_name_to_option(name: &str) -> Option<Options> {
    Some(match name {
        "none" => Options::empty(),
        "ttl" => Options::TTL,
        "mss" => Options::MSS,
        "w-md5" => Options::WMD5,
        "n-ack" => Options::NACK,
        "w-ack" => Options::WACK,
        "w-csum" => Options::WCSUM,
        "w-seq" => Options::WSEQ,
        "w-time" => Options::WTIME,
        "tfo" => Options::TFO,
        "half-tfo" => Options::HTFO,
        "keep-alive" => Options::KEEPALIVE,
        "synx2" => Options::SYNX2,
        "http" => Options::HTTP,
        "https" => Options::HTTPS,
        "move" => Options::MOVE,
        "strip" => Options::STRIP,
        "ipv4" => Options::IPV4,
        "ipv6" => Options::IPV6,
        "mode2" => Options::MODE2,
        "df" => Options::DF,
        "sat" => Options::SAT,
        "rand" => Options::RAND,
        "s-seg" => Options::SSEG,
        "1-seg" => Options::ONESEG,
        "proxy" => Options::PROXY,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_methods() {
        let (opts, unknown) = Options::from_method_csv("ttl,ipv6");
        assert!(opts.contains(Options::TTL));
        assert!(opts.contains(Options::IPV6));
        assert!(unknown.is_empty());
    }

    #[test]
    fn reports_unknown_methods() {
        let (opts, unknown) = Options::from_method_csv("ttl,bogus");
        assert!(opts.contains(Options::TTL));
        assert_eq!(unknown, vec!["bogus".to_string()]);
    }

    #[test]
    fn fake_mask_is_union_of_individual_fake_options() {
        let fake = Options::TTL
            | Options::WMD5
            | Options::NACK
            | Options::WACK
            | Options::WCSUM
            | Options::WSEQ
            | Options::WTIME;
        assert_eq!(Options::FAKE, fake);
    }
}
