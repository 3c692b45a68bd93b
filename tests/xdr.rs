use std::fmt::Debug;

use oncrpc::xdr::rpc::{auth_flavor, opaque_auth, MAX_AUTH_BYTES};
use oncrpc::xdr::{deserialize, Deserialize, Serialize};

#[derive(Default)]
struct Context {
    buf: Vec<u8>,
}

trait TestValue: Deserialize + Serialize + Eq + Default + Debug + Clone {}
impl<T: Deserialize + Serialize + Eq + Default + Debug + Clone> TestValue for T {}

impl Context {
    fn check<T: TestValue>(&mut self, src_value: &T) {
        for capacity in 0..32 {
            for exsist in 0..capacity {
                self.buf = Vec::with_capacity(capacity);
                self.buf.resize(exsist, Default::default());

                src_value.serialize(&mut self.buf).expect("cannot serialize");
                assert_eq!((self.buf.len() - exsist) % 4, 0);

                let result_value =
                    deserialize::<T>(&mut &self.buf[exsist..]).expect("cannot deserialize");

                assert_eq!(src_value, &result_value);
            }
        }
    }

    fn check_multi<T: TestValue>(&mut self, src_values: &[T]) {
        src_values.iter().for_each(|i| self.check(i));
    }
}

#[derive(Default, PartialEq, Eq, Debug, Clone)]
struct TestForVecU8(Vec<u8>);

impl Serialize for TestForVecU8 {
    fn serialize<W: std::io::Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.0.serialize(dest)
    }
}

impl Deserialize for TestForVecU8 {
    fn deserialize<R: std::io::Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0.deserialize(src)
    }
}

#[derive(Default, PartialEq, Eq, Debug, Clone)]
struct TestForVec<T>(Vec<T>);

impl<T: TestValue> Serialize for TestForVec<T> {
    fn serialize<W: std::io::Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.0.serialize(dest)
    }
}

impl<T: TestValue> Deserialize for TestForVec<T> {
    fn deserialize<R: std::io::Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0.deserialize(src)
    }
}

#[derive(Default, PartialEq, Eq, Debug, Clone)]
struct TestForString(String);

impl Serialize for TestForString {
    fn serialize<W: std::io::Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.0.serialize(dest)
    }
}

impl Deserialize for TestForString {
    fn deserialize<R: std::io::Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0.deserialize(src)
    }
}

#[test]
fn test_scalar_bijection() {
    let mut ctx = Context::default();

    ctx.check_multi(&[true, false]);

    ctx.check_multi(&[i32::MIN, -1i32, 0i32, 1i32, i32::MAX]);

    ctx.check_multi(&[u32::MIN, 0u32, 1u32, 2u32, u32::MAX]);
    ctx.check_multi(&[u64::MIN, 0u64, 1u64, 2u64, u64::MAX]);
}

#[test]
fn test_str_bijection() {
    let mut ctx = Context::default();

    ctx.check_multi(&[
        TestForString(String::from("")),
        TestForString(String::from("abc1234+-")),
        TestForString(String::from("abc")),
    ]);
}

#[test]
fn test_vec_bijection() {
    let mut ctx = Context::default();

    ctx.check_multi(&[
        TestForVecU8(vec![]),
        TestForVecU8(vec![1u8]),
        TestForVecU8(vec![1u8, 2u8, 3u8]),
        TestForVecU8(vec![1u8, 2u8, 3u8, 4u8]),
    ]);
    ctx.check_multi(&[
        TestForVec(vec![]),
        TestForVec(vec![1u32]),
        TestForVec(vec![1u32, 2u32, 3u32]),
        TestForVec(vec![1u32, 2u32, 3u32, 4u32]),
    ]);
}

#[test]
fn test_non_ascii_string_rejected() {
    let mut buf = Vec::new();
    "caf\u{e9}".to_string().into_bytes().as_slice().serialize(&mut buf).expect("serialize");
    assert!(deserialize::<String>(&mut &buf[..]).is_err());
}

#[test]
fn test_opaque_auth_bijection() {
    let mut ctx = Context::default();

    ctx.check_multi(&[
        opaque_auth::default(),
        opaque_auth { flavor: auth_flavor::AUTH_UNIX, body: vec![0, 1, 2, 3, 4] },
        opaque_auth { flavor: auth_flavor::AUTH_SHORT, body: vec![7; MAX_AUTH_BYTES] },
        // Unassigned flavor values round-trip instead of failing the parse
        opaque_auth { flavor: auth_flavor::UNKNOWN(390_625), body: vec![] },
    ]);
}

#[test]
fn test_oversized_auth_body_rejected_by_declared_length() {
    // A body length beyond the protocol ceiling must fail even when no
    // payload bytes follow the length word.
    let mut buf = Vec::new();
    0u32.serialize(&mut buf).expect("flavor");
    ((MAX_AUTH_BYTES + 1) as u32).serialize(&mut buf).expect("length");

    let err = deserialize::<opaque_auth>(&mut &buf[..]).expect_err("must reject");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn test_auth_flavor_wire_values() {
    for (flavor, wire) in [
        (auth_flavor::AUTH_NONE, 0),
        (auth_flavor::AUTH_UNIX, 1),
        (auth_flavor::AUTH_SHORT, 2),
        (auth_flavor::AUTH_DES, 3),
        (auth_flavor::AUTH_KERB, 4),
        (auth_flavor::RPCSEC_GSS, 6),
    ] {
        assert_eq!(flavor.to_wire(), wire);
        assert_eq!(auth_flavor::from_wire(wire), flavor);
    }
    assert_eq!(auth_flavor::from_wire(5), auth_flavor::UNKNOWN(5));
}
