// Copyright (c) 2024, The QuicSand Project Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright
//       notice, this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above
//       copyright notice, this list of conditions and the following disclaimer
//       in the documentation and/or other materials provided with the
//       distribution.
//
//     * Neither the name of the copyright holder nor the names of its
//       contributors may be used to endorse or promote products derived from
//       this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! # Fingerprint Registry
//!
//! Static catalog of browser TLS fingerprints. Each entry pins the
//! ordered cipher list, named groups, signature schemes, extension
//! order, ALPN list, GREASE placement, padding and session-ticket
//! policy of a real client. The extension *order* is as much a part of
//! the fingerprint as the values themselves.

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// Codepoints used by the catalog. Names follow the IANA registries.
pub mod codes {
    // TLS 1.3 cipher suites.
    pub const TLS_AES_128_GCM_SHA256: u16 = 0x1301;
    pub const TLS_AES_256_GCM_SHA384: u16 = 0x1302;
    pub const TLS_CHACHA20_POLY1305_SHA256: u16 = 0x1303;
    // TLS 1.2 ECDHE suites.
    pub const ECDHE_ECDSA_AES_128_GCM: u16 = 0xc02b;
    pub const ECDHE_RSA_AES_128_GCM: u16 = 0xc02f;
    pub const ECDHE_ECDSA_AES_256_GCM: u16 = 0xc02c;
    pub const ECDHE_RSA_AES_256_GCM: u16 = 0xc030;
    pub const ECDHE_ECDSA_CHACHA20: u16 = 0xcca9;
    pub const ECDHE_RSA_CHACHA20: u16 = 0xcca8;
    pub const DHE_RSA_AES_128_GCM: u16 = 0x009e;
    pub const DHE_RSA_AES_256_GCM: u16 = 0x009f;
    pub const DHE_RSA_CHACHA20: u16 = 0xccaa;
    pub const ECDHE_ECDSA_AES_128_CBC: u16 = 0xc009;
    pub const ECDHE_RSA_AES_128_CBC: u16 = 0xc013;
    pub const ECDHE_ECDSA_AES_256_CBC: u16 = 0xc00a;
    pub const ECDHE_RSA_AES_256_CBC: u16 = 0xc014;

    // Named groups.
    pub const X25519: u16 = 0x001d;
    pub const SECP256R1: u16 = 0x0017;
    pub const SECP384R1: u16 = 0x0018;
    pub const SECP521R1: u16 = 0x0019;
    pub const FFDHE2048: u16 = 0x0100;
    pub const FFDHE3072: u16 = 0x0101;

    // Signature schemes.
    pub const ECDSA_SECP256R1_SHA256: u16 = 0x0403;
    pub const ECDSA_SECP384R1_SHA384: u16 = 0x0503;
    pub const ECDSA_SECP521R1_SHA512: u16 = 0x0603;
    pub const RSA_PSS_RSAE_SHA256: u16 = 0x0804;
    pub const RSA_PSS_RSAE_SHA384: u16 = 0x0805;
    pub const RSA_PSS_RSAE_SHA512: u16 = 0x0806;
    pub const RSA_PKCS1_SHA256: u16 = 0x0401;
    pub const RSA_PKCS1_SHA384: u16 = 0x0501;
    pub const RSA_PKCS1_SHA512: u16 = 0x0601;

    // Extension types.
    pub const EXT_SERVER_NAME: u16 = 0x0000;
    pub const EXT_MAX_FRAGMENT_LENGTH: u16 = 0x0001;
    pub const EXT_STATUS_REQUEST: u16 = 0x0005;
    pub const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
    pub const EXT_EC_POINT_FORMATS: u16 = 0x000b;
    pub const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
    pub const EXT_ALPN: u16 = 0x0010;
    pub const EXT_SCT: u16 = 0x0012;
    pub const EXT_PADDING: u16 = 0x0015;
    pub const EXT_EXTENDED_MASTER_SECRET: u16 = 0x0017;
    pub const EXT_ENCRYPT_THEN_MAC: u16 = 0x0022;
    pub const EXT_SESSION_TICKET: u16 = 0x0023;
    pub const EXT_RECORD_SIZE_LIMIT: u16 = 0x0028;
    pub const EXT_PRE_SHARED_KEY: u16 = 0x0029;
    pub const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
    pub const EXT_PSK_KEY_EXCHANGE_MODES: u16 = 0x002d;
    pub const EXT_KEY_SHARE: u16 = 0x0033;
    pub const EXT_APPLICATION_SETTINGS: u16 = 0x4469;
    pub const EXT_RENEGOTIATION_INFO: u16 = 0xff01;

    // TLS versions as they appear on the wire.
    pub const TLS1_0: u16 = 0x0301;
    pub const TLS1_1: u16 = 0x0302;
    pub const TLS1_2: u16 = 0x0303;
    pub const TLS1_3: u16 = 0x0304;

    /// The sixteen reserved GREASE values (RFC 8701).
    pub fn grease_value(index: usize) -> u16 {
        let n = (index as u16 % 16) * 0x1010;
        0x0a0a + n
    }
}

/// Identifier of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum BrowserFingerprint {
    ChromeLatest,
    FirefoxLatest,
    SafariLatest,
    EdgeChromium,
    Brave,
    Opera,
    Chrome70,
    Firefox63,
    ChromeAndroid,
    SafariIos,
    SamsungBrowser,
    FirefoxMobile,
    EdgeMobile,
    Outlook,
    Thunderbird,
    Curl,
    Randomized,
    Custom,
}

impl BrowserFingerprint {
    /// Every concrete catalog entry (RANDOMIZED and CUSTOM resolve to
    /// one of these).
    pub fn catalog() -> &'static [BrowserFingerprint] {
        use BrowserFingerprint::*;
        &[
            ChromeLatest,
            FirefoxLatest,
            SafariLatest,
            EdgeChromium,
            Brave,
            Opera,
            Chrome70,
            Firefox63,
            ChromeAndroid,
            SafariIos,
            SamsungBrowser,
            FirefoxMobile,
            EdgeMobile,
            Outlook,
            Thunderbird,
            Curl,
        ]
    }

    /// Case-insensitive parse of the short names accepted on the CLI.
    pub fn from_cli_name(name: &str) -> Option<BrowserFingerprint> {
        use BrowserFingerprint::*;
        match name.to_ascii_lowercase().as_str() {
            "chrome" => Some(ChromeLatest),
            "firefox" => Some(FirefoxLatest),
            "safari" => Some(SafariLatest),
            "edge" => Some(EdgeChromium),
            "brave" => Some(Brave),
            "opera" => Some(Opera),
            "chrome_android" => Some(ChromeAndroid),
            "safari_ios" => Some(SafariIos),
            "random" => Some(Randomized),
            _ => None,
        }
    }
}

impl std::fmt::Display for BrowserFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use BrowserFingerprint::*;
        let s = match self {
            ChromeLatest => "chrome_latest",
            FirefoxLatest => "firefox_latest",
            SafariLatest => "safari_latest",
            EdgeChromium => "edge_chromium",
            Brave => "brave",
            Opera => "opera",
            Chrome70 => "chrome_70",
            Firefox63 => "firefox_63",
            ChromeAndroid => "chrome_android",
            SafariIos => "safari_ios",
            SamsungBrowser => "samsung_browser",
            FirefoxMobile => "firefox_mobile",
            EdgeMobile => "edge_mobile",
            Outlook => "outlook",
            Thunderbird => "thunderbird",
            Curl => "curl",
            Randomized => "randomized",
            Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Where a profile sprinkles GREASE codepoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GreasePolicy {
    pub cipher_suites: bool,
    pub extensions: bool,
    pub named_groups: bool,
    pub signature_algorithms: bool,
}

impl GreasePolicy {
    pub const NONE: GreasePolicy = GreasePolicy {
        cipher_suites: false,
        extensions: false,
        named_groups: false,
        signature_algorithms: false,
    };

    /// Chromium places GREASE in ciphers, groups and at both ends of
    /// the extension list; it leaves signature algorithms alone.
    pub const CHROMIUM: GreasePolicy = GreasePolicy {
        cipher_suites: true,
        extensions: true,
        named_groups: true,
        signature_algorithms: false,
    };

    /// Safari greases ciphers, groups and the extension list head.
    pub const WEBKIT: GreasePolicy = GreasePolicy {
        cipher_suites: true,
        extensions: true,
        named_groups: true,
        signature_algorithms: false,
    };

    pub fn any(&self) -> bool {
        self.cipher_suites || self.extensions || self.named_groups || self.signature_algorithms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTicketMode {
    Off,
    On,
    Extended,
}

/// Browser-specific QUIC transport parameters, advertised alongside the
/// fingerprint so the transport layer matches the hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportProfile {
    pub initial_max_data: u64,
    pub initial_max_stream_data: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub max_idle_timeout_ms: u64,
}

const DESKTOP_TRANSPORT: TransportProfile = TransportProfile {
    initial_max_data: 10_000_000,
    initial_max_stream_data: 1_000_000,
    initial_max_streams_bidi: 100,
    initial_max_streams_uni: 100,
    max_idle_timeout_ms: 30_000,
};

const FIREFOX_TRANSPORT: TransportProfile = TransportProfile {
    initial_max_data: 12_582_912,
    initial_max_stream_data: 1_048_576,
    initial_max_streams_bidi: 100,
    initial_max_streams_uni: 100,
    max_idle_timeout_ms: 60_000,
};

const SAFARI_TRANSPORT: TransportProfile = TransportProfile {
    initial_max_data: 15_728_640,
    initial_max_stream_data: 2_097_152,
    initial_max_streams_bidi: 100,
    initial_max_streams_uni: 100,
    max_idle_timeout_ms: 45_000,
};

const MOBILE_TRANSPORT: TransportProfile = TransportProfile {
    initial_max_data: 5_000_000,
    initial_max_stream_data: 500_000,
    initial_max_streams_bidi: 100,
    initial_max_streams_uni: 100,
    max_idle_timeout_ms: 30_000,
};

/// A fully resolved fingerprint. Catalog entries are immutable; a
/// profile handed to the configurator is a mutable copy (RANDOMIZED
/// perturbs it per connection).
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintProfile {
    pub id: BrowserFingerprint,
    pub name: String,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub named_groups: Vec<u16>,
    pub signature_algorithms: Vec<u16>,
    /// Extension type codes in emission order.
    pub extensions: Vec<u16>,
    pub alpn: Vec<String>,
    pub version_min: u16,
    pub version_max: u16,
    pub grease: GreasePolicy,
    /// ClientHello length is padded to a multiple of this (0 = none).
    pub padding_multiple: u16,
    pub session_tickets: SessionTicketMode,
    pub record_size_limit: u16,
    pub max_fragment_length: u16,
    pub zero_rtt_allowed: bool,
    pub transport: TransportProfile,
}

impl FingerprintProfile {
    /// Supported-versions list in hello order (highest first).
    pub fn supported_versions(&self) -> Vec<u16> {
        (self.version_min..=self.version_max).rev().collect()
    }
}

fn alpn(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Looks up the immutable catalog entry for `id`. RANDOMIZED and CUSTOM
/// are not catalog entries; callers resolve them first (see
/// [`randomized_profile`]).
pub fn profile(id: BrowserFingerprint) -> FingerprintProfile {
    use codes::*;
    use BrowserFingerprint::*;

    match id {
        ChromeLatest | EdgeChromium | Brave | Opera => {
            let name = id.to_string();
            FingerprintProfile {
                id,
                name,
                cipher_suites: vec![
                    TLS_AES_128_GCM_SHA256,
                    TLS_AES_256_GCM_SHA384,
                    TLS_CHACHA20_POLY1305_SHA256,
                    ECDHE_ECDSA_AES_128_GCM,
                    ECDHE_RSA_AES_128_GCM,
                    ECDHE_ECDSA_AES_256_GCM,
                    ECDHE_RSA_AES_256_GCM,
                    ECDHE_ECDSA_CHACHA20,
                    ECDHE_RSA_CHACHA20,
                    DHE_RSA_AES_128_GCM,
                    DHE_RSA_AES_256_GCM,
                ],
                compression_methods: vec![0x00],
                named_groups: vec![X25519, SECP256R1, SECP384R1, SECP521R1, FFDHE2048, FFDHE3072],
                signature_algorithms: vec![
                    ECDSA_SECP256R1_SHA256,
                    RSA_PSS_RSAE_SHA256,
                    RSA_PSS_RSAE_SHA384,
                    RSA_PSS_RSAE_SHA512,
                    ECDSA_SECP384R1_SHA384,
                    ECDSA_SECP521R1_SHA512,
                    RSA_PKCS1_SHA256,
                    RSA_PKCS1_SHA384,
                    RSA_PKCS1_SHA512,
                ],
                extensions: vec![
                    EXT_SERVER_NAME,
                    EXT_STATUS_REQUEST,
                    EXT_SUPPORTED_GROUPS,
                    EXT_EC_POINT_FORMATS,
                    EXT_SIGNATURE_ALGORITHMS,
                    EXT_ALPN,
                    EXT_SCT,
                    EXT_ENCRYPT_THEN_MAC,
                    EXT_SESSION_TICKET,
                    EXT_KEY_SHARE,
                    EXT_SUPPORTED_VERSIONS,
                    EXT_PSK_KEY_EXCHANGE_MODES,
                    EXT_EXTENDED_MASTER_SECRET,
                    EXT_PRE_SHARED_KEY,
                    EXT_PADDING,
                    EXT_APPLICATION_SETTINGS,
                ],
                alpn: alpn(&["h3", "h3-29", "h2", "http/1.1"]),
                version_min: TLS1_1,
                version_max: TLS1_3,
                grease: GreasePolicy::CHROMIUM,
                padding_multiple: 64,
                session_tickets: SessionTicketMode::On,
                record_size_limit: 16385,
                max_fragment_length: 0,
                zero_rtt_allowed: true,
                transport: DESKTOP_TRANSPORT,
            }
        }
        FirefoxLatest | FirefoxMobile => FingerprintProfile {
            id,
            name: id.to_string(),
            cipher_suites: vec![
                TLS_AES_128_GCM_SHA256,
                TLS_CHACHA20_POLY1305_SHA256,
                TLS_AES_256_GCM_SHA384,
                ECDHE_ECDSA_AES_128_GCM,
                ECDHE_RSA_AES_128_GCM,
                ECDHE_ECDSA_CHACHA20,
                ECDHE_RSA_CHACHA20,
                ECDHE_ECDSA_AES_256_GCM,
                ECDHE_RSA_AES_256_GCM,
                DHE_RSA_AES_128_GCM,
                DHE_RSA_CHACHA20,
                DHE_RSA_AES_256_GCM,
            ],
            compression_methods: vec![0x00],
            named_groups: vec![X25519, SECP256R1, SECP384R1, SECP521R1, FFDHE2048, FFDHE3072],
            signature_algorithms: vec![
                ECDSA_SECP256R1_SHA256,
                RSA_PSS_RSAE_SHA256,
                RSA_PKCS1_SHA256,
                ECDSA_SECP384R1_SHA384,
                RSA_PSS_RSAE_SHA384,
                RSA_PKCS1_SHA384,
                ECDSA_SECP521R1_SHA512,
                RSA_PSS_RSAE_SHA512,
                RSA_PKCS1_SHA512,
            ],
            extensions: vec![
                EXT_SERVER_NAME,
                EXT_STATUS_REQUEST,
                EXT_SUPPORTED_GROUPS,
                EXT_EC_POINT_FORMATS,
                EXT_SIGNATURE_ALGORITHMS,
                EXT_ALPN,
                EXT_SCT,
                EXT_EXTENDED_MASTER_SECRET,
                EXT_SESSION_TICKET,
                EXT_RECORD_SIZE_LIMIT,
                EXT_SUPPORTED_VERSIONS,
                EXT_PSK_KEY_EXCHANGE_MODES,
                EXT_KEY_SHARE,
                EXT_RENEGOTIATION_INFO,
            ],
            alpn: alpn(&["h3", "h2", "http/1.1"]),
            version_min: TLS1_2,
            version_max: TLS1_3,
            grease: GreasePolicy::NONE,
            padding_multiple: 0,
            session_tickets: SessionTicketMode::On,
            record_size_limit: 16385,
            max_fragment_length: if id == FirefoxMobile { 4096 } else { 0 },
            zero_rtt_allowed: true,
            transport: if id == FirefoxMobile {
                MOBILE_TRANSPORT
            } else {
                FIREFOX_TRANSPORT
            },
        },
        SafariLatest | SafariIos => FingerprintProfile {
            id,
            name: id.to_string(),
            cipher_suites: vec![
                TLS_AES_128_GCM_SHA256,
                TLS_AES_256_GCM_SHA384,
                TLS_CHACHA20_POLY1305_SHA256,
                ECDHE_ECDSA_AES_256_GCM,
                ECDHE_ECDSA_AES_128_GCM,
                ECDHE_ECDSA_CHACHA20,
                ECDHE_RSA_AES_256_GCM,
                ECDHE_RSA_AES_128_GCM,
                ECDHE_RSA_CHACHA20,
            ],
            compression_methods: vec![0x00],
            named_groups: vec![X25519, SECP256R1, SECP384R1],
            signature_algorithms: vec![
                ECDSA_SECP256R1_SHA256,
                ECDSA_SECP384R1_SHA384,
                RSA_PSS_RSAE_SHA256,
                RSA_PKCS1_SHA256,
                RSA_PKCS1_SHA384,
                RSA_PSS_RSAE_SHA384,
                ECDSA_SECP521R1_SHA512,
                RSA_PKCS1_SHA512,
            ],
            extensions: vec![
                EXT_SERVER_NAME,
                EXT_STATUS_REQUEST,
                EXT_SUPPORTED_GROUPS,
                EXT_EC_POINT_FORMATS,
                EXT_SIGNATURE_ALGORITHMS,
                EXT_ALPN,
                EXT_EXTENDED_MASTER_SECRET,
                EXT_SUPPORTED_VERSIONS,
                EXT_PSK_KEY_EXCHANGE_MODES,
                EXT_KEY_SHARE,
                EXT_MAX_FRAGMENT_LENGTH,
                EXT_RENEGOTIATION_INFO,
            ],
            alpn: alpn(&["h3", "h2", "http/1.1"]),
            version_min: TLS1_1,
            version_max: TLS1_3,
            grease: GreasePolicy::WEBKIT,
            padding_multiple: 0,
            session_tickets: SessionTicketMode::On,
            record_size_limit: 16384,
            max_fragment_length: if id == SafariIos { 4096 } else { 16384 },
            zero_rtt_allowed: true,
            transport: if id == SafariIos {
                MOBILE_TRANSPORT
            } else {
                SAFARI_TRANSPORT
            },
        },
        ChromeAndroid | SamsungBrowser | EdgeMobile => {
            let mut p = profile(ChromeLatest);
            p.id = id;
            p.name = id.to_string();
            // Mobile Chromium reorders ChaCha20 ahead of the AES-256
            // TLS 1.2 suites and advertises smaller initial windows.
            p.cipher_suites = vec![
                TLS_AES_128_GCM_SHA256,
                TLS_AES_256_GCM_SHA384,
                TLS_CHACHA20_POLY1305_SHA256,
                ECDHE_ECDSA_AES_128_GCM,
                ECDHE_RSA_AES_128_GCM,
                ECDHE_ECDSA_CHACHA20,
                ECDHE_RSA_CHACHA20,
                ECDHE_ECDSA_AES_256_GCM,
                ECDHE_RSA_AES_256_GCM,
            ];
            p.version_min = TLS1_2;
            p.max_fragment_length = 4096;
            p.record_size_limit = 16384;
            p.transport = MOBILE_TRANSPORT;
            p
        }
        Chrome70 => {
            let mut p = profile(ChromeLatest);
            p.id = id;
            p.name = id.to_string();
            p.cipher_suites.extend_from_slice(&[
                ECDHE_RSA_AES_128_CBC,
                ECDHE_RSA_AES_256_CBC,
            ]);
            p.version_min = TLS1_0;
            p.version_max = TLS1_2;
            // Pre-TLS1.3 Chrome: no PSK modes, no key share.
            p.extensions.retain(|e| {
                *e != EXT_PSK_KEY_EXCHANGE_MODES
                    && *e != EXT_KEY_SHARE
                    && *e != EXT_PRE_SHARED_KEY
                    && *e != EXT_APPLICATION_SETTINGS
            });
            p.zero_rtt_allowed = false;
            p
        }
        Firefox63 => {
            let mut p = profile(FirefoxLatest);
            p.id = id;
            p.name = id.to_string();
            p.cipher_suites.extend_from_slice(&[
                ECDHE_ECDSA_AES_128_CBC,
                ECDHE_RSA_AES_128_CBC,
                ECDHE_ECDSA_AES_256_CBC,
                ECDHE_RSA_AES_256_CBC,
            ]);
            p.version_min = TLS1_0;
            p.version_max = TLS1_2;
            p.extensions
                .retain(|e| *e != EXT_PSK_KEY_EXCHANGE_MODES && *e != EXT_KEY_SHARE);
            p.zero_rtt_allowed = false;
            p
        }
        Outlook => FingerprintProfile {
            id,
            name: id.to_string(),
            cipher_suites: vec![
                TLS_AES_256_GCM_SHA384,
                TLS_AES_128_GCM_SHA256,
                TLS_CHACHA20_POLY1305_SHA256,
                ECDHE_RSA_AES_256_GCM,
                ECDHE_RSA_AES_128_GCM,
                ECDHE_RSA_CHACHA20,
            ],
            compression_methods: vec![0x00],
            named_groups: vec![X25519, SECP256R1, SECP384R1],
            signature_algorithms: vec![
                RSA_PKCS1_SHA256,
                RSA_PKCS1_SHA384,
                RSA_PKCS1_SHA512,
                ECDSA_SECP256R1_SHA256,
                ECDSA_SECP384R1_SHA384,
            ],
            extensions: vec![
                EXT_SERVER_NAME,
                EXT_STATUS_REQUEST,
                EXT_SUPPORTED_GROUPS,
                EXT_EC_POINT_FORMATS,
                EXT_SIGNATURE_ALGORITHMS,
                EXT_EXTENDED_MASTER_SECRET,
                EXT_SUPPORTED_VERSIONS,
                EXT_PSK_KEY_EXCHANGE_MODES,
                EXT_KEY_SHARE,
            ],
            alpn: alpn(&["h2", "http/1.1"]),
            version_min: TLS1_2,
            version_max: TLS1_3,
            grease: GreasePolicy::NONE,
            padding_multiple: 0,
            session_tickets: SessionTicketMode::On,
            record_size_limit: 16384,
            max_fragment_length: 0,
            zero_rtt_allowed: false,
            transport: DESKTOP_TRANSPORT,
        },
        Thunderbird => FingerprintProfile {
            id,
            name: id.to_string(),
            cipher_suites: vec![
                TLS_AES_128_GCM_SHA256,
                TLS_CHACHA20_POLY1305_SHA256,
                TLS_AES_256_GCM_SHA384,
                ECDHE_ECDSA_AES_128_GCM,
                ECDHE_RSA_AES_128_GCM,
                ECDHE_ECDSA_CHACHA20,
                ECDHE_RSA_CHACHA20,
            ],
            compression_methods: vec![0x00],
            named_groups: vec![X25519, SECP256R1, SECP384R1],
            signature_algorithms: vec![
                ECDSA_SECP256R1_SHA256,
                RSA_PKCS1_SHA256,
                ECDSA_SECP384R1_SHA384,
                RSA_PKCS1_SHA384,
                RSA_PSS_RSAE_SHA256,
                RSA_PSS_RSAE_SHA384,
            ],
            extensions: vec![
                EXT_SERVER_NAME,
                EXT_STATUS_REQUEST,
                EXT_SUPPORTED_GROUPS,
                EXT_EC_POINT_FORMATS,
                EXT_SIGNATURE_ALGORITHMS,
                EXT_ALPN,
                EXT_EXTENDED_MASTER_SECRET,
                EXT_SUPPORTED_VERSIONS,
                EXT_PSK_KEY_EXCHANGE_MODES,
                EXT_KEY_SHARE,
                EXT_PRE_SHARED_KEY,
            ],
            alpn: alpn(&["h2", "http/1.1"]),
            version_min: TLS1_2,
            version_max: TLS1_3,
            grease: GreasePolicy::NONE,
            padding_multiple: 0,
            session_tickets: SessionTicketMode::On,
            record_size_limit: 16384,
            max_fragment_length: 0,
            zero_rtt_allowed: false,
            transport: FIREFOX_TRANSPORT,
        },
        Curl => FingerprintProfile {
            id,
            name: id.to_string(),
            cipher_suites: vec![
                TLS_AES_256_GCM_SHA384,
                TLS_AES_128_GCM_SHA256,
                TLS_CHACHA20_POLY1305_SHA256,
                ECDHE_ECDSA_AES_256_GCM,
                ECDHE_RSA_AES_256_GCM,
            ],
            compression_methods: vec![0x00],
            named_groups: vec![X25519, SECP256R1],
            signature_algorithms: vec![RSA_PKCS1_SHA256, ECDSA_SECP256R1_SHA256],
            extensions: vec![
                EXT_SERVER_NAME,
                EXT_SUPPORTED_GROUPS,
                EXT_SIGNATURE_ALGORITHMS,
                EXT_SUPPORTED_VERSIONS,
                EXT_KEY_SHARE,
            ],
            alpn: alpn(&["h2", "http/1.1"]),
            version_min: TLS1_2,
            version_max: TLS1_3,
            grease: GreasePolicy::NONE,
            padding_multiple: 0,
            session_tickets: SessionTicketMode::Off,
            record_size_limit: 16384,
            max_fragment_length: 0,
            zero_rtt_allowed: false,
            transport: DESKTOP_TRANSPORT,
        },
        Randomized | Custom => fallback_profile(),
    }
}

/// Minimal profile guaranteed to interoperate; installed whenever a
/// richer profile fails to apply.
pub fn fallback_profile() -> FingerprintProfile {
    use codes::*;
    FingerprintProfile {
        id: BrowserFingerprint::Custom,
        name: "fallback".to_string(),
        cipher_suites: vec![
            TLS_AES_128_GCM_SHA256,
            TLS_AES_256_GCM_SHA384,
            TLS_CHACHA20_POLY1305_SHA256,
        ],
        compression_methods: vec![0x00],
        named_groups: vec![X25519, SECP256R1],
        signature_algorithms: vec![RSA_PKCS1_SHA256, ECDSA_SECP256R1_SHA256],
        extensions: vec![
            EXT_SERVER_NAME,
            EXT_SUPPORTED_GROUPS,
            EXT_SIGNATURE_ALGORITHMS,
            EXT_ALPN,
            EXT_SUPPORTED_VERSIONS,
            EXT_PSK_KEY_EXCHANGE_MODES,
            EXT_KEY_SHARE,
        ],
        alpn: vec!["h3".to_string()],
        version_min: TLS1_3,
        version_max: TLS1_3,
        grease: GreasePolicy::NONE,
        padding_multiple: 0,
        session_tickets: SessionTicketMode::On,
        record_size_limit: 0,
        max_fragment_length: 0,
        zero_rtt_allowed: false,
        transport: DESKTOP_TRANSPORT,
    }
}

/// Number of leading cipher suites the randomizer never touches: the
/// TLS 1.3 suites every modern client leads with.
pub const RANDOMIZE_CIPHER_FLOOR: usize = 3;

/// Draws a base profile by usage category (desktop 55%, mobile 35%,
/// uncommon 8%, specialised 2%) and applies bounded perturbations so
/// repeated connections do not share an identical hello.
pub fn randomized_profile(rng: &mut StdRng) -> FingerprintProfile {
    use BrowserFingerprint::*;

    const DESKTOP: &[BrowserFingerprint] = &[ChromeLatest, FirefoxLatest, SafariLatest, EdgeChromium];
    const MOBILE: &[BrowserFingerprint] = &[ChromeAndroid, SafariIos, SamsungBrowser, FirefoxMobile];
    const UNCOMMON: &[BrowserFingerprint] = &[Brave, Opera, EdgeMobile];
    const SPECIALISED: &[BrowserFingerprint] = &[Outlook, Thunderbird, Curl];

    let roll = rng.gen_range(0..100u32);
    let pool = if roll < 55 {
        DESKTOP
    } else if roll < 90 {
        MOBILE
    } else if roll < 98 {
        UNCOMMON
    } else {
        SPECIALISED
    };

    let base = *pool.choose(rng).unwrap_or(&ChromeLatest);
    let mut p = profile(base);
    p.name = format!("randomized ({})", base);
    p.id = BrowserFingerprint::Randomized;

    // Swap two non-leading ciphers. The leading TLS 1.3 suites are the
    // compatibility floor and keep their positions.
    if p.cipher_suites.len() > RANDOMIZE_CIPHER_FLOOR + 1 {
        let span = p.cipher_suites.len() - RANDOMIZE_CIPHER_FLOOR;
        let a = RANDOMIZE_CIPHER_FLOOR + rng.gen_range(0..span);
        let b = RANDOMIZE_CIPHER_FLOOR + rng.gen_range(0..span);
        p.cipher_suites.swap(a, b);
    }

    // Nudge the record size limit by at most 10%.
    if p.record_size_limit > 0 && rng.gen_bool(0.5) {
        let pct = rng.gen_range(90..=110) as u32;
        p.record_size_limit = ((p.record_size_limit as u32 * pct) / 100) as u16;
    }

    // Occasionally advertise an alternative fragment length cap.
    if p.max_fragment_length > 0 && rng.gen_bool(0.25) {
        p.max_fragment_length = *[1024u16, 2048, 4096].choose(rng).unwrap_or(&4096);
    }

    p
}
