//! Bounds-checked walking of socket control (ancillary) data.
//!
//! The kernel hands control data back as raw bytes. Every header and payload
//! is checked against the number of bytes the kernel reported before any of it
//! is interpreted.

use std::{mem, ptr};

use crate::{
    error::CredentialIssue,
    platform::{cmsg_len, cmsg_space, KernelCredential, CONTROL_CAPACITY},
};

/// Fixed, suitably aligned storage for the control data of one receive.
#[repr(C, align(8))]
pub struct ControlBuffer {
    bytes: [u8; CONTROL_CAPACITY],
}

impl ControlBuffer {
    pub fn new() -> Self {
        Self {
            bytes: [0u8; CONTROL_CAPACITY],
        }
    }

    pub fn capacity(&self) -> usize {
        CONTROL_CAPACITY
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    /// The first `len` bytes, clamped to the buffer size.
    pub fn filled(&self, len: usize) -> &[u8] {
        &self.bytes[..len.min(CONTROL_CAPACITY)]
    }

    #[cfg(test)]
    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Default for ControlBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// One control message header together with its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMessage<'a> {
    pub level: libc::c_int,
    pub kind:  libc::c_int,
    /// `cmsg_len` as declared in the header.
    pub len:   usize,
    /// Payload bytes actually present, which can be shorter than declared.
    pub data:  &'a [u8],
}

/// Iterator over the control messages in a received control buffer.
///
/// Stops at the first header that does not fit or declares a length shorter
/// than the header itself.
pub struct ControlMessages<'a> {
    buf:    &'a [u8],
    offset: usize,
}

impl<'a> ControlMessages<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }
}

impl<'a> Iterator for ControlMessages<'a> {
    type Item = ControlMessage<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header_len = cmsg_len(0);
        let rest = self.buf.get(self.offset..)?;
        if rest.len() < mem::size_of::<libc::cmsghdr>() {
            return None;
        }

        // SAFETY: `rest` holds at least size_of::<cmsghdr>() bytes and cmsghdr
        // is a C structure of integers. read_unaligned has no alignment
        // requirement on the source pointer.
        let header = unsafe { ptr::read_unaligned(rest.as_ptr().cast::<libc::cmsghdr>()) };
        let len = header.cmsg_len as usize;
        if len < header_len {
            return None;
        }

        let data = &rest[header_len.min(rest.len())..len.min(rest.len())];
        self.offset = self
            .offset
            .saturating_add(cmsg_space(len - header_len))
            .min(self.buf.len());

        Some(ControlMessage {
            level: header.cmsg_level,
            kind: header.cmsg_type,
            len,
            data,
        })
    }
}

/// Takes the platform credential out of received control data.
///
/// `control` must be exactly the bytes the kernel reported and `truncated`
/// whether it set `MSG_CTRUNC`. The first message with the credential level
/// and type is used; its declared length has to equal
/// [`KernelCredential::control_len`] before the payload is read.
pub fn extract_credential<C: KernelCredential>(
    control: &[u8],
    truncated: bool,
) -> Result<C, CredentialIssue> {
    if truncated {
        return Err(CredentialIssue::Truncated);
    }

    let mut first = None;
    for message in ControlMessages::new(control) {
        if message.level == C::LEVEL && message.kind == C::KIND {
            let expected = C::control_len();
            if message.len != expected {
                return Err(CredentialIssue::WrongLength {
                    expected,
                    actual: message.len,
                });
            }
            return C::from_bytes(message.data).ok_or(CredentialIssue::Unreadable);
        }
        first.get_or_insert(message);
    }

    match first {
        Some(message) => Err(CredentialIssue::WrongKind {
            level: message.level,
            kind:  message.kind,
        }),
        None => Err(CredentialIssue::Missing),
    }
}

#[cfg(test)]
#[cfg(any(target_os = "linux", target_os = "android"))]
mod tests {
    use super::*;
    use crate::platform::PlatformCredential;

    /// Writes one control message at `offset` and returns the offset of the next.
    fn put_message(
        buf: &mut [u8],
        offset: usize,
        level: libc::c_int,
        kind: libc::c_int,
        declared_len: usize,
        payload: &[u8],
    ) -> usize {
        // SAFETY: an all-zero cmsghdr is valid.
        let mut header: libc::cmsghdr = unsafe { mem::zeroed() };
        header.cmsg_len = declared_len as _;
        header.cmsg_level = level;
        header.cmsg_type = kind;
        // SAFETY: the slice bound checks that the header fits.
        unsafe {
            ptr::write_unaligned(
                buf[offset..offset + mem::size_of::<libc::cmsghdr>()]
                    .as_mut_ptr()
                    .cast::<libc::cmsghdr>(),
                header,
            )
        };
        let start = offset + cmsg_len(0);
        buf[start..start + payload.len()].copy_from_slice(payload);
        offset + cmsg_space(payload.len())
    }

    fn ucred_payload(uid: u32, gid: u32) -> Vec<u8> {
        let cred = libc::ucred { pid: 7, uid, gid };
        let mut bytes = vec![0u8; mem::size_of::<libc::ucred>()];
        // SAFETY: `bytes` is exactly size_of::<ucred>() long.
        unsafe { ptr::write_unaligned(bytes.as_mut_ptr().cast::<libc::ucred>(), cred) };
        bytes
    }

    #[test]
    fn extracts_well_formed_credential() {
        let mut control = ControlBuffer::new();
        let payload = ucred_payload(1000, 100);
        let end = put_message(
            control.as_mut_bytes(),
            0,
            libc::SOL_SOCKET,
            libc::SCM_CREDENTIALS,
            cmsg_len(payload.len()),
            &payload,
        );

        let cred = extract_credential::<PlatformCredential>(control.filled(end), false).unwrap();
        assert_eq!(cred.user_id(), 1000);
        assert_eq!(cred.group_id(), 100);
    }

    #[test]
    fn empty_control_data_is_missing() {
        let result = extract_credential::<PlatformCredential>(&[], false);
        assert_eq!(result.unwrap_err(), CredentialIssue::Missing);
    }

    #[test]
    fn truncated_flag_wins_over_contents() {
        let mut control = ControlBuffer::new();
        let payload = ucred_payload(1000, 100);
        let end = put_message(
            control.as_mut_bytes(),
            0,
            libc::SOL_SOCKET,
            libc::SCM_CREDENTIALS,
            cmsg_len(payload.len()),
            &payload,
        );

        let result = extract_credential::<PlatformCredential>(control.filled(end), true);
        assert_eq!(result.unwrap_err(), CredentialIssue::Truncated);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut control = ControlBuffer::new();
        let payload = ucred_payload(1000, 100);
        let end = put_message(
            control.as_mut_bytes(),
            0,
            libc::SOL_SOCKET,
            libc::SCM_RIGHTS,
            cmsg_len(payload.len()),
            &payload,
        );

        let result = extract_credential::<PlatformCredential>(control.filled(end), false);
        assert_eq!(
            result.unwrap_err(),
            CredentialIssue::WrongKind {
                level: libc::SOL_SOCKET,
                kind:  libc::SCM_RIGHTS,
            }
        );
    }

    #[test]
    fn wrong_level_is_rejected() {
        let mut control = ControlBuffer::new();
        let payload = ucred_payload(1000, 100);
        let end = put_message(
            control.as_mut_bytes(),
            0,
            libc::IPPROTO_IP,
            libc::SCM_CREDENTIALS,
            cmsg_len(payload.len()),
            &payload,
        );

        let result = extract_credential::<PlatformCredential>(control.filled(end), false);
        assert!(matches!(result, Err(CredentialIssue::WrongKind { .. })));
    }

    #[test]
    fn wrong_declared_length_is_rejected_before_reading() {
        let mut control = ControlBuffer::new();
        let payload = ucred_payload(1000, 100);
        let short = &payload[..payload.len() - 4];
        let end = put_message(
            control.as_mut_bytes(),
            0,
            libc::SOL_SOCKET,
            libc::SCM_CREDENTIALS,
            cmsg_len(short.len()),
            short,
        );

        let result = extract_credential::<PlatformCredential>(control.filled(end), false);
        assert_eq!(
            result.unwrap_err(),
            CredentialIssue::WrongLength {
                expected: PlatformCredential::control_len(),
                actual:   cmsg_len(short.len()),
            }
        );
    }

    #[test]
    fn declared_length_beyond_received_bytes_is_unreadable() {
        let mut control = ControlBuffer::new();
        let payload = ucred_payload(1000, 100);
        put_message(
            control.as_mut_bytes(),
            0,
            libc::SOL_SOCKET,
            libc::SCM_CREDENTIALS,
            cmsg_len(payload.len()),
            &payload,
        );

        // The kernel reported fewer control bytes than the header declares.
        let reported = cmsg_len(payload.len()) - 2;
        let result = extract_credential::<PlatformCredential>(control.filled(reported), false);
        assert_eq!(result.unwrap_err(), CredentialIssue::Unreadable);
    }

    #[test]
    fn header_shorter_than_itself_stops_iteration() {
        let mut control = ControlBuffer::new();
        put_message(control.as_mut_bytes(), 0, libc::SOL_SOCKET, libc::SCM_CREDENTIALS, 1, &[]);

        let filled = control.filled(cmsg_len(0));
        assert_eq!(ControlMessages::new(filled).count(), 0);
        assert_eq!(
            extract_credential::<PlatformCredential>(filled, false).unwrap_err(),
            CredentialIssue::Missing
        );
    }

    #[test]
    fn iterates_multiple_messages() {
        let mut buf = vec![0u8; 256];
        let fd_payload = 3i32.to_ne_bytes();
        let cred_payload = ucred_payload(0, 0);
        let next = put_message(
            &mut buf,
            0,
            libc::SOL_SOCKET,
            libc::SCM_RIGHTS,
            cmsg_len(fd_payload.len()),
            &fd_payload,
        );
        let end = put_message(
            &mut buf,
            next,
            libc::SOL_SOCKET,
            libc::SCM_CREDENTIALS,
            cmsg_len(cred_payload.len()),
            &cred_payload,
        );

        let kinds: Vec<_> = ControlMessages::new(&buf[..end]).map(|m| m.kind).collect();
        assert_eq!(kinds, vec![libc::SCM_RIGHTS, libc::SCM_CREDENTIALS]);

        let cred = extract_credential::<PlatformCredential>(&buf[..end], false).unwrap();
        assert_eq!(cred.user_id(), 0);
        assert_eq!(cred.group_id(), 0);
    }
}
