//! ClientHello synthesis.
//!
//! Renders a [`FingerprintProfile`] into the byte image of the TLS
//! ClientHello a real browser would emit: cipher order, extension
//! order, GREASE placement and padding all come from the profile. The
//! image is used to verify and log the fingerprint (JA3) and as the
//! template the wire configuration is matched against; the client's
//! private random, session id and key-share material are freshly drawn
//! per build.

use md5::{Digest, Md5};
use rand::rngs::StdRng;
use rand::Rng;

use super::fingerprint::{codes, FingerprintProfile};

/// GREASE codepoints occupy 0x?a?a (RFC 8701).
pub fn is_grease(v: u16) -> bool {
    v & 0x0f0f == 0x0a0a && (v >> 8) == (v & 0xff)
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u24(out: &mut Vec<u8>, v: usize) {
    out.push(((v >> 16) & 0xff) as u8);
    out.push(((v >> 8) & 0xff) as u8);
    out.push((v & 0xff) as u8);
}

/// Extension payload encoders. Each returns the extension data only;
/// the caller frames it with type and length.
fn server_name(hostname: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(hostname.len() + 5);
    put_u16(&mut data, (hostname.len() + 3) as u16);
    data.push(0x00); // host_name
    put_u16(&mut data, hostname.len() as u16);
    data.extend_from_slice(hostname.as_bytes());
    data
}

fn status_request() -> Vec<u8> {
    // OCSP, empty responder id and extension lists.
    vec![0x01, 0x00, 0x00, 0x00, 0x00]
}

fn supported_groups(profile: &FingerprintProfile, grease: Option<u16>) -> Vec<u8> {
    let mut groups: Vec<u16> = Vec::with_capacity(profile.named_groups.len() + 1);
    if let Some(g) = grease {
        groups.push(g);
    }
    groups.extend_from_slice(&profile.named_groups);
    let mut data = Vec::with_capacity(groups.len() * 2 + 2);
    put_u16(&mut data, (groups.len() * 2) as u16);
    for g in groups {
        put_u16(&mut data, g);
    }
    data
}

fn ec_point_formats() -> Vec<u8> {
    vec![0x01, 0x00] // uncompressed only
}

fn signature_algorithms(profile: &FingerprintProfile) -> Vec<u8> {
    let mut data = Vec::with_capacity(profile.signature_algorithms.len() * 2 + 2);
    put_u16(&mut data, (profile.signature_algorithms.len() * 2) as u16);
    for s in &profile.signature_algorithms {
        put_u16(&mut data, *s);
    }
    data
}

fn alpn(profile: &FingerprintProfile) -> Vec<u8> {
    let list_len: usize = profile.alpn.iter().map(|p| 1 + p.len()).sum();
    let mut data = Vec::with_capacity(list_len + 2);
    put_u16(&mut data, list_len as u16);
    for proto in &profile.alpn {
        data.push(proto.len() as u8);
        data.extend_from_slice(proto.as_bytes());
    }
    data
}

fn supported_versions(profile: &FingerprintProfile) -> Vec<u8> {
    let versions = profile.supported_versions();
    let mut data = Vec::with_capacity(versions.len() * 2 + 1);
    data.push((versions.len() * 2) as u8);
    for v in versions {
        put_u16(&mut data, v);
    }
    data
}

fn psk_key_exchange_modes() -> Vec<u8> {
    vec![0x01, 0x01] // psk_dhe_ke
}

fn key_share(profile: &FingerprintProfile, grease: Option<u16>, rng: &mut StdRng) -> Vec<u8> {
    let mut shares = Vec::new();
    if let Some(g) = grease {
        // Chromium sends a single-byte placeholder share for GREASE.
        put_u16(&mut shares, g);
        put_u16(&mut shares, 1);
        shares.push(0x00);
    }
    // One real share for the leading group (x25519-sized public key).
    if let Some(group) = profile.named_groups.first() {
        let mut public = [0u8; 32];
        rng.fill(&mut public);
        put_u16(&mut shares, *group);
        put_u16(&mut shares, public.len() as u16);
        shares.extend_from_slice(&public);
    }
    let mut data = Vec::with_capacity(shares.len() + 2);
    put_u16(&mut data, shares.len() as u16);
    data.extend_from_slice(&shares);
    data
}

fn pre_shared_key(rng: &mut StdRng) -> Vec<u8> {
    // Resumption-shaped identity plus a SHA-256-sized binder. Real
    // binder values are computed by the TLS engine; this template only
    // has to be structurally valid.
    let identity_len = 128 + rng.gen_range(0..64) as usize;
    let mut data = Vec::with_capacity(identity_len + 50);
    put_u16(&mut data, (identity_len + 6) as u16);
    put_u16(&mut data, identity_len as u16);
    for _ in 0..identity_len {
        data.push(rng.gen());
    }
    let age: u32 = rng.gen();
    data.extend_from_slice(&age.to_be_bytes());
    put_u16(&mut data, 33);
    data.push(32);
    for _ in 0..32 {
        data.push(rng.gen());
    }
    data
}

fn application_settings(profile: &FingerprintProfile) -> Vec<u8> {
    // ALPS advertises the ALPN values the client accepts settings for.
    let supported: Vec<&String> = profile
        .alpn
        .iter()
        .filter(|p| p.as_str() == "h2" || p.as_str() == "h3")
        .collect();
    let list_len: usize = supported.iter().map(|p| 1 + p.len()).sum();
    let mut data = Vec::with_capacity(list_len + 2);
    put_u16(&mut data, list_len as u16);
    for proto in supported {
        data.push(proto.len() as u8);
        data.extend_from_slice(proto.as_bytes());
    }
    data
}

fn max_fragment_length(profile: &FingerprintProfile) -> Vec<u8> {
    let code = match profile.max_fragment_length {
        512 => 1,
        1024 => 2,
        2048 => 3,
        _ => 4,
    };
    vec![code]
}

/// Builds the ClientHello handshake message (type + 3-byte length +
/// body) for `profile` with `hostname` as SNI.
pub fn build_client_hello(
    profile: &FingerprintProfile,
    hostname: &str,
    rng: &mut StdRng,
) -> Vec<u8> {
    let modern = profile.version_max >= codes::TLS1_3;
    let legacy_version = profile.version_max.min(codes::TLS1_2);

    // Two distinct GREASE draws: one for cipher/group slots, one for
    // the extension slots, matching Chromium's pairing.
    let grease_a = codes::grease_value(rng.gen_range(0..16));
    let grease_b = {
        let mut v = codes::grease_value(rng.gen_range(0..16));
        if v == grease_a {
            v = codes::grease_value(((v >> 12) as usize + 1) % 16);
        }
        v
    };

    let mut body = Vec::with_capacity(512);
    put_u16(&mut body, legacy_version);

    let mut random = [0u8; 32];
    rng.fill(&mut random);
    body.extend_from_slice(&random);

    // Modern clients send a full-size legacy session id for middlebox
    // compatibility; pre-1.3 profiles send none.
    if modern {
        body.push(32);
        let mut session_id = [0u8; 32];
        rng.fill(&mut session_id);
        body.extend_from_slice(&session_id);
    } else {
        body.push(0);
    }

    let mut ciphers: Vec<u16> = Vec::with_capacity(profile.cipher_suites.len() + 1);
    if profile.grease.cipher_suites {
        ciphers.push(grease_a);
    }
    ciphers.extend_from_slice(&profile.cipher_suites);
    put_u16(&mut body, (ciphers.len() * 2) as u16);
    for c in &ciphers {
        put_u16(&mut body, *c);
    }

    body.push(profile.compression_methods.len() as u8);
    body.extend_from_slice(&profile.compression_methods);

    // Assemble extensions in profile order.
    let mut ext_block = Vec::with_capacity(512);
    let emit = |block: &mut Vec<u8>, ext_type: u16, data: Vec<u8>| {
        put_u16(block, ext_type);
        put_u16(block, data.len() as u16);
        block.extend_from_slice(&data);
    };

    if profile.grease.extensions {
        emit(&mut ext_block, grease_a, Vec::new());
    }

    let group_grease = if profile.grease.named_groups {
        Some(grease_b)
    } else {
        None
    };

    for ext in &profile.extensions {
        match *ext {
            codes::EXT_SERVER_NAME => emit(&mut ext_block, *ext, server_name(hostname)),
            codes::EXT_STATUS_REQUEST => emit(&mut ext_block, *ext, status_request()),
            codes::EXT_SUPPORTED_GROUPS => {
                emit(&mut ext_block, *ext, supported_groups(profile, group_grease))
            }
            codes::EXT_EC_POINT_FORMATS => emit(&mut ext_block, *ext, ec_point_formats()),
            codes::EXT_SIGNATURE_ALGORITHMS => {
                emit(&mut ext_block, *ext, signature_algorithms(profile))
            }
            codes::EXT_ALPN => emit(&mut ext_block, *ext, alpn(profile)),
            codes::EXT_SUPPORTED_VERSIONS => emit(&mut ext_block, *ext, supported_versions(profile)),
            codes::EXT_PSK_KEY_EXCHANGE_MODES => {
                emit(&mut ext_block, *ext, psk_key_exchange_modes())
            }
            codes::EXT_KEY_SHARE => {
                emit(&mut ext_block, *ext, key_share(profile, group_grease, rng))
            }
            codes::EXT_PRE_SHARED_KEY => emit(&mut ext_block, *ext, pre_shared_key(rng)),
            codes::EXT_RECORD_SIZE_LIMIT => {
                let mut data = Vec::with_capacity(2);
                put_u16(&mut data, profile.record_size_limit);
                emit(&mut ext_block, *ext, data);
            }
            codes::EXT_MAX_FRAGMENT_LENGTH => {
                emit(&mut ext_block, *ext, max_fragment_length(profile))
            }
            codes::EXT_APPLICATION_SETTINGS => {
                if profile.grease.extensions {
                    // Chromium places its second GREASE extension just
                    // before ALPS.
                    emit(&mut ext_block, grease_b, vec![0x00]);
                }
                emit(&mut ext_block, *ext, application_settings(profile));
            }
            codes::EXT_RENEGOTIATION_INFO => emit(&mut ext_block, *ext, vec![0x00]),
            codes::EXT_PADDING => {
                // Handled after the rest of the block is measured.
            }
            // SCT, encrypt-then-MAC, extended master secret, session
            // ticket: empty on a fresh hello.
            _ => emit(&mut ext_block, *ext, Vec::new()),
        }
    }

    // Pad the handshake message to the profile's multiple. The padding
    // extension itself (4-byte header) is part of the padded length.
    if profile.padding_multiple > 0 {
        let unpadded = 4 + body.len() + 2 + ext_block.len() + 4;
        let multiple = profile.padding_multiple as usize;
        let pad = (multiple - (unpadded % multiple)) % multiple;
        emit(&mut ext_block, codes::EXT_PADDING, vec![0u8; pad]);
    } else if profile.extensions.contains(&codes::EXT_PADDING) {
        emit(&mut ext_block, codes::EXT_PADDING, Vec::new());
    }

    put_u16(&mut body, ext_block.len() as u16);
    body.extend_from_slice(&ext_block);

    let mut hello = Vec::with_capacity(body.len() + 4);
    hello.push(0x01); // client_hello
    put_u24(&mut hello, body.len());
    hello.extend_from_slice(&body);
    hello
}

/// JA3 input string: version,ciphers,extensions,groups,point-formats
/// with GREASE stripped, fields joined by commas and lists by dashes.
pub fn ja3_string(profile: &FingerprintProfile) -> String {
    let version = profile.version_max.min(codes::TLS1_2);
    let join = |vals: &[u16]| {
        vals.iter()
            .filter(|v| !is_grease(**v))
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("-")
    };
    let formats = if profile.extensions.contains(&codes::EXT_EC_POINT_FORMATS) {
        "0"
    } else {
        ""
    };
    format!(
        "{},{},{},{},{}",
        version,
        join(&profile.cipher_suites),
        join(&profile.extensions),
        join(&profile.named_groups),
        formats
    )
}

/// MD5 of the JA3 string, lowercase hex.
pub fn ja3_hash(profile: &FingerprintProfile) -> String {
    let digest = Md5::digest(ja3_string(profile).as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
