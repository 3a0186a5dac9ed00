// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use hex_literal::hex;
use zenoh_client_rs::{
    codec::{
        buf::{Reader, Writer},
        prim,
    },
    error::ZError,
    proto::core::ZenohId,
};

#[test]
fn test_vle_round_trip() -> Result<()> {
    for v in [
        0u64,
        1,
        0x7f,
        0x80,
        0x3fff,
        0x4000,
        0x0fff_ffff,
        u32::MAX as u64,
        u64::MAX,
    ] {
        let mut w = Writer::new();
        prim::write_vle(&mut w, v);
        let mut r = Reader::new(w.as_slice());
        assert_eq!(prim::read_vle(&mut r)?, v, "value {v:#x}");
        assert!(r.is_empty());
    }
    Ok(())
}

#[test]
fn test_vle_wire_form() -> Result<()> {
    let mut w = Writer::new();
    prim::write_vle(&mut w, 0x7f);
    assert_eq!(w.as_slice(), &hex!("7f")[..]);

    let mut w = Writer::new();
    prim::write_vle(&mut w, 0x80);
    assert_eq!(w.as_slice(), &hex!("80 01")[..]);

    let mut w = Writer::new();
    prim::write_vle(&mut w, 300);
    assert_eq!(w.as_slice(), &hex!("ac 02")[..]);
    Ok(())
}

#[test]
fn test_vle_max_length_overflow() {
    // Eleven continuation bytes can never be a valid u64.
    let bytes = hex!("ff ff ff ff ff ff ff ff ff ff 01");
    let mut r = Reader::new(&bytes);
    let err = prim::read_vle(&mut r).expect_err("must overflow");
    assert_eq!(err, ZError::MalformedPacket);

    // Ten bytes whose final group overflows the width.
    let bytes = hex!("ff ff ff ff ff ff ff ff ff 7f");
    let mut r = Reader::new(&bytes);
    let err = prim::read_vle(&mut r).expect_err("final byte overflows");
    assert_eq!(err, ZError::MalformedPacket);
}

#[test]
fn test_vle_short_buffer() {
    let bytes = hex!("80 80");
    let mut r = Reader::new(&bytes);
    let err = prim::read_vle(&mut r).expect_err("sequence is truncated");
    assert_eq!(err, ZError::NotEnoughData);
}

#[test]
fn test_bytes_and_string() -> Result<()> {
    let mut w = Writer::new();
    prim::write_string(&mut w, "demo/example");
    prim::write_bytes(&mut w, &[0x68, 0x69]);

    let mut r = Reader::new(w.as_slice());
    assert_eq!(prim::read_string(&mut r)?, "demo/example");
    assert_eq!(prim::read_bytes(&mut r)?, &[0x68u8, 0x69][..]);
    assert!(r.is_empty());
    Ok(())
}

#[test]
fn test_string_short_buffer() {
    // Length prefix promises more bytes than the buffer holds.
    let bytes = hex!("0a 61 62");
    let mut r = Reader::new(&bytes);
    let err = prim::read_bytes(&mut r).expect_err("payload is truncated");
    assert_eq!(err, ZError::NotEnoughData);
}

#[test]
fn test_u16_little_endian() -> Result<()> {
    let mut w = Writer::new();
    prim::write_u16_le(&mut w, 0x1234);
    assert_eq!(w.as_slice(), &hex!("34 12")[..]);

    let mut r = Reader::new(w.as_slice());
    assert_eq!(prim::read_u16_le(&mut r)?, 0x1234);
    Ok(())
}

#[test]
fn test_zid_round_trip() -> Result<()> {
    for len in 1..=16usize {
        let bytes: Vec<u8> = (0..len as u8).map(|b| b + 1).collect();
        let zid = ZenohId::new(&bytes)?;
        let mut w = Writer::new();
        zid.encode(&mut w);
        assert_eq!(w.len(), len + 1);
        assert_eq!(w.as_slice()[0], (len - 1) as u8);

        let mut r = Reader::new(w.as_slice());
        assert_eq!(ZenohId::decode(&mut r)?, zid);
    }
    Ok(())
}

#[test]
fn test_zid_rejects_bad_lengths() {
    assert!(ZenohId::new(&[]).is_err());
    assert!(ZenohId::new(&[0u8; 17]).is_err());

    // Reserved high bits in the length byte.
    let bytes = hex!("10 aa");
    let mut r = Reader::new(&bytes);
    assert_eq!(
        ZenohId::decode(&mut r).expect_err("reserved bits set"),
        ZError::MalformedPacket
    );
}
