//! AUTH_UNIX credential decoding as specified in RFC 5531 appendix A.
//!
//! The credential body of an AUTH_UNIX call is an XDR-encoded structure
//! carrying the caller's claimed identity. The body arrives inside an
//! `opaque_auth` container and is entirely attacker-controlled, so every
//! field length is validated before any bytes are consumed and no partial
//! credential is ever produced.
//!
//! Wire layout of the credential body (big-endian, 4-byte aligned):
//!
//! ```text
//! +--------+------+-----------------+-------+-------+--------+-------------+
//! | stamp  | slen | machine + pad   |  uid  |  gid  | gidlen | gids[0..n)  |
//! +--------+------+-----------------+-------+-------+--------+-------------+
//! ```

use std::fmt;
use std::io::{Cursor, Read, Write};

use byteorder::ReadBytesExt;
use tracing::trace;

use crate::protocol::xdr::rpc::{auth_flavor, opaque_auth};
use crate::protocol::xdr::{self, Serialize, XDREndian};

/// Maximum total number of groups in a credential, primary gid included.
///
/// Matches the traditional NGROUPS limit of UNIX kernels. The credential
/// stores the primary gid in slot 0, so at most [`NGROUPS`]` - 1`
/// supplementary gids may be declared on the wire.
pub const NGROUPS: usize = 16;

/// Maximum supplementary group count a credential may declare.
pub const MAX_SUPPLEMENTARY_GROUPS: usize = NGROUPS - 1;

/// Maximum machine-name length in bytes.
pub const MAX_MACHINE_NAME: usize = 255;

/// A decoded AUTH_UNIX credential.
///
/// Constructed per call from the wire and discarded once the call's
/// authentication verdict has been produced; never cached beyond the call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnixCredential {
    /// Arbitrary client-chosen stamp, not validated
    pub stamp: u32,
    /// The name of the client machine, kept only for logging
    pub machine_name: Vec<u8>,
    /// The effective user ID of the caller
    pub uid: u32,
    /// The effective group ID of the caller
    pub gid: u32,
    /// All group IDs of the caller; slot 0 is the primary gid
    pub groups: Vec<u32>,
}

impl UnixCredential {
    /// Supplementary group IDs, excluding the primary gid in slot 0.
    pub fn supplementary_groups(&self) -> &[u32] {
        self.groups.get(1..).unwrap_or(&[])
    }

    /// Wraps the encoded credential in an AUTH_UNIX `opaque_auth` container.
    pub fn to_opaque_auth(&self) -> std::io::Result<opaque_auth> {
        let mut body = Vec::new();
        self.serialize(&mut body)?;
        Ok(opaque_auth { flavor: auth_flavor::AUTH_UNIX, body })
    }
}

/// XDR encoding of the credential body, the inverse of
/// [`decode_unix_credential`]. The primary gid is written to the `gid` field
/// and only the supplementary groups go into the trailing array.
impl Serialize for UnixCredential {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.stamp.serialize(dest)?;
        self.machine_name.as_slice().serialize(dest)?;
        self.uid.serialize(dest)?;
        self.gid.serialize(dest)?;
        self.supplementary_groups().serialize(dest)?;
        Ok(())
    }
}

/// Why an AUTH_UNIX credential body failed to decode.
///
/// Every variant maps to `AUTH_BADCRED` at the protocol level; the
/// distinction exists for logging and tests.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CredentialError {
    /// The body ended before the structure was complete
    Truncated,
    /// Declared machine-name length exceeds [MAX_MACHINE_NAME]
    MachineNameTooLong(usize),
    /// Declared group count exceeds [MAX_SUPPLEMENTARY_GROUPS]
    TooManyGroups(usize),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::Truncated => write!(f, "credential body truncated"),
            CredentialError::MachineNameTooLong(len) => {
                write!(f, "machine name length {len} exceeds {MAX_MACHINE_NAME}")
            }
            CredentialError::TooManyGroups(count) => {
                write!(f, "group count {count} exceeds {MAX_SUPPLEMENTARY_GROUPS}")
            }
        }
    }
}

impl std::error::Error for CredentialError {}

fn read_word(src: &mut Cursor<&[u8]>) -> Result<u32, CredentialError> {
    src.read_u32::<XDREndian>().map_err(|_| CredentialError::Truncated)
}

/// Parses an XDR-encoded AUTH_UNIX credential body.
///
/// Pure parse over exactly `body.len()` bytes: each length field is checked
/// against its ceiling before the corresponding bytes are consumed, and any
/// read past the end of the body fails with [`CredentialError::Truncated`].
/// Declared group counts above the ceiling are rejected outright rather than
/// skipped. Trailing bytes after a structurally complete credential are
/// tolerated, since the enclosing opaque container may be padded.
pub fn decode_unix_credential(body: &[u8]) -> Result<UnixCredential, CredentialError> {
    let mut src = Cursor::new(body);

    let stamp = read_word(&mut src)?;

    let slen = read_word(&mut src)? as usize;
    if slen > MAX_MACHINE_NAME {
        return Err(CredentialError::MachineNameTooLong(slen));
    }
    let mut machine_name = vec![0_u8; slen];
    src.read_exact(&mut machine_name).map_err(|_| CredentialError::Truncated)?;
    xdr::read_padding(slen, &mut src).map_err(|_| CredentialError::Truncated)?;

    let uid = read_word(&mut src)?;
    let gid = read_word(&mut src)?;

    let gidlen = read_word(&mut src)? as usize;
    if gidlen > MAX_SUPPLEMENTARY_GROUPS {
        return Err(CredentialError::TooManyGroups(gidlen));
    }
    let mut groups = Vec::with_capacity(1 + gidlen);
    groups.push(gid);
    for _ in 0..gidlen {
        groups.push(read_word(&mut src)?);
    }

    trace!(
        "decoded AUTH_UNIX credential uid:{} gid:{} groups:{} machine:{}",
        uid,
        gid,
        groups.len(),
        String::from_utf8_lossy(&machine_name)
    );

    Ok(UnixCredential { stamp, machine_name, uid, gid, groups })
}
