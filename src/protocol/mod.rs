//! ## Protocol Types, Readers and Writers.
//!
//! All NatNet protocol types can be written-to and read-from little-endian bytes using the
//! **WriteBytes** and **ReadBytes** traits respectively. These traits are implemented for all
//! types implementing the **std::io** **Write** and **Read** traits.
//!
//! Unlike most packet-oriented protocols, the layout of a NatNet payload depends on the
//! protocol revision negotiated with the server: fields appear, widen or vanish between
//! NatNet 2.0 and 3.1. Types whose layout is revision-dependent implement the
//! **WriteVersionedBytes** and **ReadVersionedBytes** traits instead, which thread the
//! latched [`ProtocolVersion`] through every read and write.
//!
//! *Note that the types within these modules do not mirror the packed C structures the
//! protocol was specified with; counted arrays are expressed as `Vec`s and null-terminated
//! names as owned strings. The read and write implementations match the wire layout
//! exactly - structs on the wire are tightly packed and little-endian, so every multi-byte
//! field is copied into a local rather than dereferenced in place.*
//!
//! ## Reading a Packet.
//!
//! Every NatNet datagram starts with the 4-byte base [`Header`]. To read a packet whose
//! contents are not known ahead of time:
//!
//! - Read the base **Header** first.
//! - Match on the `message_id` field to determine the payload type.
//! - Decode the payload with the version latched from the last **PingResponse**, via
//!   [`frame::FrameOfData::decode`] or [`model::ModelDef::decode`].
//!
//! Both `decode` entry points verify that the number of consumed bytes equals
//! `num_data_bytes`; any mismatch marks the packet malformed.

pub use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::ffi::CString;
use std::{fmt, io, mem};
use thiserror::Error;

pub mod frame;
pub mod model;

/// Message identifiers carried in the base [`Header`].
pub mod message_id {
    pub const PING: u16 = 0;
    pub const PING_RESPONSE: u16 = 1;
    pub const REQUEST_MODELDEF: u16 = 4;
    pub const MODELDEF: u16 = 5;
    pub const REQUEST_FRAMEOFDATA: u16 = 6;
    pub const FRAMEOFDATA: u16 = 7;
    pub const MESSAGE_STRING: u16 = 8;
    pub const UNRECOGNIZED_REQUEST: u16 = 100;
}

/// The port the server listens on for command datagrams (PING, REQUEST_MODELDEF, ...).
pub const COMMAND_PORT: u16 = 1510;

/// The port frame-of-data packets are multicast on.
pub const DATA_PORT: u16 = 1511;

/// The default multicast group frame-of-data packets are published to.
pub const MULTICAST_ADDR: [u8; 4] = [239, 255, 42, 99];

/// The maximum number of payload bytes in a single NatNet packet.
pub const MAX_PACKET_SIZE: usize = 100_000;

/// The fixed width of the name field within a [`Sender`] record.
pub const SENDER_NAME_LEN: usize = 256;

/// Errors produced while decoding a NatNet packet.
///
/// Anything other than `Io` indicates a well-formed read of a malformed packet; the packet
/// is dropped and no frame is emitted.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("i/o error while decoding: {0}")]
    Io(#[from] io::Error),
    /// The payload was longer than the number of bytes the decoder consumed.
    #[error("{remaining} trailing bytes after decoding payload")]
    TrailingBytes { remaining: usize },
    /// The end-of-data sentinel at the tail of a frame-of-data payload was non-zero.
    #[error("end-of-data sentinel was {0}, expected 0")]
    EndOfData(i32),
}

/// A latched NatNet protocol revision, as reported by the server in its PingResponse.
///
/// A major of `0` appearing in a *gate* check means "newest supported" - servers use it
/// for forward compatibility. A fully zero version means no PingResponse has been
/// received yet and frame decoding must be refused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    /// The newest revision this implementation can parse.
    pub const SUPPORTED: Self = ProtocolVersion { major: 3, minor: 1 };

    pub const fn new(major: u8, minor: u8) -> Self {
        ProtocolVersion { major, minor }
    }

    /// Whether a PingResponse has latched a usable version.
    pub fn is_latched(self) -> bool {
        self.major != 0 || self.minor != 0
    }

    /// Version gate used throughout the decoders. A major of `0` passes every gate.
    pub fn at_least(self, major: u8, minor: u8) -> bool {
        if self.major == 0 {
            return true;
        }
        (self.major, self.minor) >= (major, minor)
    }

    /// True if this version is newer than [`ProtocolVersion::SUPPORTED`].
    pub fn exceeds_supported(self) -> bool {
        let sup = Self::SUPPORTED;
        (self.major, self.minor) > (sup.major, sup.minor)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

/// The base layer provides a standard, single, header used at the start of all NatNet
/// packets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct Header {
    /// Which message the payload carries. See [`message_id`].
    pub message_id: u16,
    /// Number of payload bytes following the header.
    pub num_data_bytes: u16,
}

/// The payload of a PingResponse: the sending application's identity and versions.
///
/// On the wire the name occupies a fixed 256-byte field; the remainder past the first
/// null byte is padding. The two version fields are `[major, minor, build, revision]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct Sender {
    /// The sending application's name.
    pub name: CString,
    /// The sending application's version.
    pub version: [u8; 4],
    /// The sending application's NatNet version. Receipt of this latches the
    /// [`ProtocolVersion`] used for all subsequent decoding.
    pub natnet_version: [u8; 4],
}

impl Sender {
    /// The NatNet revision advertised by this record.
    pub fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::new(self.natnet_version[0], self.natnet_version[1])
    }
}

/// A trait for writing any of the NatNet protocol types to little-endian bytes.
///
/// A blanket implementation is provided for all types that implement `byteorder::WriteBytesExt`.
pub trait WriteBytes {
    fn write_bytes<P: WriteToBytes>(&mut self, protocol: P) -> io::Result<()>;
}

/// A trait for reading any of the NatNet protocol types from little-endian bytes.
///
/// A blanket implementation is provided for all types that implement `byteorder::ReadBytesExt`.
pub trait ReadBytes {
    fn read_bytes<P: ReadFromBytes>(&mut self) -> io::Result<P>;
}

/// Protocol types that may be written to little endian bytes.
pub trait WriteToBytes {
    /// Write the command to bytes.
    fn write_to_bytes<W: WriteBytesExt>(&self, writer: W) -> io::Result<()>;
}

/// Protocol types that may be read from little endian bytes.
pub trait ReadFromBytes: Sized {
    /// Read the command from bytes.
    fn read_from_bytes<R: ReadBytesExt>(reader: R) -> io::Result<Self>;
}

/// Protocol types whose byte layout depends on the latched NatNet revision.
pub trait WriteVersionedBytes {
    /// Write the type to bytes as the given protocol revision lays it out.
    fn write_versioned_bytes<W: WriteBytesExt>(
        &self,
        writer: W,
        version: ProtocolVersion,
    ) -> io::Result<()>;
}

/// Protocol types whose byte layout depends on the latched NatNet revision.
pub trait ReadVersionedBytes: Sized {
    /// Read the type from bytes as the given protocol revision lays it out.
    fn read_versioned_bytes<R: ReadBytesExt>(
        reader: R,
        version: ProtocolVersion,
    ) -> io::Result<Self>;
}

/// Types that have a constant size when written to or read from bytes.
pub trait ConstSizeBytes: SizeBytes {
    const SIZE_BYTES: usize;
}

/// Types whose size when written to bytes may be determined at runtime.
pub trait SizeBytes {
    fn size_bytes(&self) -> usize;
}

impl WriteToBytes for Header {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LE>(self.message_id)?;
        writer.write_u16::<LE>(self.num_data_bytes)?;
        Ok(())
    }
}

impl ReadFromBytes for Header {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let message_id = reader.read_u16::<LE>()?;
        let num_data_bytes = reader.read_u16::<LE>()?;
        let header = Header {
            message_id,
            num_data_bytes,
        };
        Ok(header)
    }
}

impl WriteToBytes for Sender {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        let bytes = self.name.as_bytes_with_nul();
        if bytes.len() > SENDER_NAME_LEN {
            let err_msg = "sender name exceeds the fixed 256-byte field";
            return Err(io::Error::new(io::ErrorKind::InvalidData, err_msg));
        }
        writer.write_all(bytes)?;
        for _ in bytes.len()..SENDER_NAME_LEN {
            writer.write_u8(0)?;
        }
        writer.write_all(&self.version)?;
        writer.write_all(&self.natnet_version)?;
        Ok(())
    }
}

impl ReadFromBytes for Sender {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let mut name_field = [0u8; SENDER_NAME_LEN];
        reader.read_exact(&mut name_field)?;
        let len = name_field.iter().position(|&b| b == 0).unwrap_or(SENDER_NAME_LEN);
        let name = unsafe { CString::from_vec_unchecked(name_field[..len].to_vec()) };
        let mut version = [0u8; 4];
        reader.read_exact(&mut version)?;
        let mut natnet_version = [0u8; 4];
        reader.read_exact(&mut natnet_version)?;
        let sender = Sender {
            name,
            version,
            natnet_version,
        };
        Ok(sender)
    }
}

impl SizeBytes for Header {
    fn size_bytes(&self) -> usize {
        Self::SIZE_BYTES
    }
}

impl ConstSizeBytes for Header {
    const SIZE_BYTES: usize = 2 * mem::size_of::<u16>();
}

impl SizeBytes for Sender {
    fn size_bytes(&self) -> usize {
        Self::SIZE_BYTES
    }
}

impl ConstSizeBytes for Sender {
    const SIZE_BYTES: usize = SENDER_NAME_LEN + 4 + 4;
}

impl<W> WriteBytes for W
where
    W: WriteBytesExt,
{
    fn write_bytes<P: WriteToBytes>(&mut self, protocol: P) -> io::Result<()> {
        protocol.write_to_bytes(self)
    }
}

impl<R> ReadBytes for R
where
    R: ReadBytesExt,
{
    fn read_bytes<P: ReadFromBytes>(&mut self) -> io::Result<P> {
        P::read_from_bytes(self)
    }
}

impl<'a, T> WriteToBytes for &'a T
where
    T: WriteToBytes,
{
    fn write_to_bytes<W: WriteBytesExt>(&self, writer: W) -> io::Result<()> {
        (**self).write_to_bytes(writer)
    }
}

impl WriteToBytes for CString {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        let bytes = self.as_bytes_with_nul();
        for &byte in bytes {
            writer.write_u8(byte)?;
        }
        Ok(())
    }
}

impl ReadFromBytes for CString {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let mut bytes = vec![];
        loop {
            match reader.read_u8()? {
                b'\0' => break,
                byte => bytes.push(byte),
            }
        }
        let cstring = unsafe { CString::from_vec_unchecked(bytes) };
        Ok(cstring)
    }
}

impl ReadFromBytes for u8 {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        reader.read_u8()
    }
}

impl ReadFromBytes for u16 {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        reader.read_u16::<LE>()
    }
}

impl SizeBytes for CString {
    fn size_bytes(&self) -> usize {
        self.as_bytes_with_nul().len()
    }
}

/// Encode a complete packet: base header followed by the payload bytes.
///
/// The payload length is checked against the `u16` width of the header's
/// `num_data_bytes` field.
pub fn write_packet<W: WriteBytesExt>(
    mut writer: W,
    message_id: u16,
    payload: &[u8],
) -> io::Result<()> {
    if payload.len() > u16::MAX as usize {
        let err_msg = "payload exceeds the u16 num_data_bytes field";
        return Err(io::Error::new(io::ErrorKind::InvalidData, err_msg));
    }
    let header = Header {
        message_id,
        num_data_bytes: payload.len() as u16,
    };
    writer.write_bytes(header)?;
    writer.write_all(payload)?;
    Ok(())
}

/// The 4-byte wire form of a payload-less request (PING, REQUEST_MODELDEF, ...).
pub fn request_packet(message_id: u16) -> [u8; 4] {
    let [id_lo, id_hi] = message_id.to_le_bytes();
    [id_lo, id_hi, 0, 0]
}

/// Read a null-terminated name into an owned string.
pub fn read_name<R: ReadBytesExt>(mut reader: R) -> io::Result<String> {
    let name: CString = reader.read_bytes()?;
    Ok(name.to_string_lossy().into_owned())
}

/// Write a name as null-terminated bytes.
pub fn write_name<W: WriteBytesExt>(mut writer: W, name: &str) -> io::Result<()> {
    let name = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "interior null byte in name"))?;
    writer.write_bytes(&name)
}

// Counts are attacker-controlled; pre-allocation is capped so a hostile count fails on
// the first short read instead of reserving gigabytes.
const PREALLOC_CAP: i32 = 1024;

/// Read the `i32` element count that prefixes every NatNet list.
pub fn read_count<R: ReadBytesExt>(mut reader: R) -> io::Result<i32> {
    let count = reader.read_i32::<LE>()?;
    if count < 0 {
        let err_msg = format!("negative element count {}", count);
        return Err(io::Error::new(io::ErrorKind::InvalidData, err_msg));
    }
    Ok(count)
}

/// Read a count-prefixed list of version-independent elements.
pub fn read_counted_vec<R, T>(mut reader: R) -> io::Result<Vec<T>>
where
    R: ReadBytesExt,
    T: ReadFromBytes,
{
    let count = read_count(&mut reader)?;
    let mut vec = Vec::with_capacity(count.min(PREALLOC_CAP) as usize);
    for _ in 0..count {
        vec.push(reader.read_bytes()?);
    }
    Ok(vec)
}

/// Read a count-prefixed list of revision-dependent elements.
pub fn read_counted_versioned_vec<R, T>(
    mut reader: R,
    version: ProtocolVersion,
) -> io::Result<Vec<T>>
where
    R: ReadBytesExt,
    T: ReadVersionedBytes,
{
    let count = read_count(&mut reader)?;
    let mut vec = Vec::with_capacity(count.min(PREALLOC_CAP) as usize);
    for _ in 0..count {
        vec.push(T::read_versioned_bytes(&mut reader, version)?);
    }
    Ok(vec)
}

/// Write a count-prefixed list of version-independent elements.
pub fn write_counted_vec<W, T>(mut writer: W, elems: &[T]) -> io::Result<()>
where
    W: WriteBytesExt,
    T: WriteToBytes,
{
    writer.write_i32::<LE>(elems.len() as i32)?;
    for elem in elems {
        writer.write_bytes(elem)?;
    }
    Ok(())
}

/// Write a count-prefixed list of revision-dependent elements.
pub fn write_counted_versioned_vec<W, T>(
    mut writer: W,
    elems: &[T],
    version: ProtocolVersion,
) -> io::Result<()>
where
    W: WriteBytesExt,
    T: WriteVersionedBytes,
{
    writer.write_i32::<LE>(elems.len() as i32)?;
    for elem in elems {
        elem.write_versioned_bytes(&mut writer, version)?;
    }
    Ok(())
}
