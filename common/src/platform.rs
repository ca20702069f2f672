//! Kernel credential layouts.
//!
//! Linux-family kernels attach a `struct ucred` tagged `SCM_CREDENTIALS` once
//! the receiving socket has set `SO_PASSCRED`. QNX Neutrino always attaches a
//! `struct sockcred` tagged `SCM_CREDS`. Exactly one implementation of
//! [`KernelCredential`] is compiled in and exported as [`PlatformCredential`].

use std::{mem, ptr};

use crate::record::{Gid, Uid};

/// A kernel credential structure carried in a socket control message.
pub trait KernelCredential: Sized + Copy {
    /// `cmsg_level` of the credential control message.
    const LEVEL: libc::c_int;

    /// `cmsg_type` of the credential control message.
    const KIND: libc::c_int;

    /// Whether the receiving socket has to opt in before the kernel attaches
    /// credentials.
    const ACTIVATION_REQUIRED: bool;

    /// Size in bytes of the raw kernel structure.
    fn size() -> usize;

    /// Reads the structure out of control message payload bytes.
    ///
    /// Returns `None` unless `data` is exactly [`KernelCredential::size`] bytes.
    fn from_bytes(data: &[u8]) -> Option<Self>;

    fn user_id(&self) -> Uid;

    fn group_id(&self) -> Gid;

    /// The exact `cmsg_len` of a control message carrying one structure.
    fn control_len() -> usize {
        cmsg_len(Self::size())
    }
}

/// `CMSG_LEN` for a payload of `payload` bytes.
#[allow(unused_unsafe)]
pub(crate) fn cmsg_len(payload: usize) -> usize {
    // SAFETY: CMSG_LEN only performs arithmetic on its argument.
    unsafe { libc::CMSG_LEN(payload as libc::c_uint) as usize }
}

/// `CMSG_SPACE` for a payload of `payload` bytes.
#[allow(unused_unsafe)]
pub(crate) fn cmsg_space(payload: usize) -> usize {
    // SAFETY: CMSG_SPACE only performs arithmetic on its argument.
    unsafe { libc::CMSG_SPACE(payload as libc::c_uint) as usize }
}

/// Copies a plain-old-data structure out of `data` after an exact length check.
fn read_exact_struct<T: Copy>(data: &[u8]) -> Option<T> {
    if data.len() != mem::size_of::<T>() {
        return None;
    }
    // SAFETY: `data` holds exactly size_of::<T>() initialized bytes and T is a
    // C structure of integers, so every bit pattern is valid. read_unaligned
    // has no alignment requirement on the source pointer.
    Some(unsafe { ptr::read_unaligned(data.as_ptr().cast::<T>()) })
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod imp {
    use std::mem;

    use super::{read_exact_struct, KernelCredential};
    use crate::record::{Gid, Uid};

    const fn align(len: usize) -> usize {
        let word = mem::size_of::<usize>();
        (len + word - 1) & !(word - 1)
    }

    /// Control buffer size: `CMSG_SPACE(sizeof(struct ucred))`.
    pub const CONTROL_CAPACITY: usize =
        align(mem::size_of::<libc::cmsghdr>()) + align(mem::size_of::<libc::ucred>());

    /// `struct ucred` as delivered with `SCM_CREDENTIALS`.
    #[derive(Clone, Copy)]
    pub struct UnixCredential(libc::ucred);

    impl UnixCredential {
        /// The sending process id
        pub fn process_id(&self) -> libc::pid_t {
            self.0.pid
        }
    }

    impl std::fmt::Debug for UnixCredential {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("UnixCredential")
                .field("pid", &self.0.pid)
                .field("uid", &self.0.uid)
                .field("gid", &self.0.gid)
                .finish()
        }
    }

    impl KernelCredential for UnixCredential {
        const LEVEL: libc::c_int = libc::SOL_SOCKET;
        const KIND: libc::c_int = libc::SCM_CREDENTIALS;
        const ACTIVATION_REQUIRED: bool = true;

        fn size() -> usize {
            mem::size_of::<libc::ucred>()
        }

        fn from_bytes(data: &[u8]) -> Option<Self> {
            read_exact_struct::<libc::ucred>(data).map(Self)
        }

        fn user_id(&self) -> Uid {
            self.0.uid
        }

        fn group_id(&self) -> Gid {
            self.0.gid
        }
    }

    pub type PlatformCredential = UnixCredential;
}

#[cfg(target_os = "nto")]
mod imp {
    use std::mem;

    use super::{read_exact_struct, KernelCredential};
    use crate::record::{Gid, Uid};

    /// `SCM_CREDS` from `<sys/socket.h>`.
    const SCM_CREDS: libc::c_int = 0x04;

    /// The kernel may append supplementary groups, so reserve generously.
    pub const CONTROL_CAPACITY: usize = 512;

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct RawSockCred {
        sc_uid:     libc::uid_t,
        sc_euid:    libc::uid_t,
        sc_gid:     libc::gid_t,
        sc_egid:    libc::gid_t,
        sc_ngroups: libc::c_int,
        sc_groups:  [libc::gid_t; 1],
    }

    /// `struct sockcred` as delivered with `SCM_CREDS`.
    #[derive(Clone, Copy)]
    pub struct SocketCredential(RawSockCred);

    impl std::fmt::Debug for SocketCredential {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SocketCredential")
                .field("uid", &self.0.sc_uid)
                .field("gid", &self.0.sc_gid)
                .finish()
        }
    }

    impl KernelCredential for SocketCredential {
        const LEVEL: libc::c_int = libc::SOL_SOCKET;
        const KIND: libc::c_int = SCM_CREDS;
        const ACTIVATION_REQUIRED: bool = false;

        fn size() -> usize {
            mem::size_of::<RawSockCred>()
        }

        fn from_bytes(data: &[u8]) -> Option<Self> {
            read_exact_struct::<RawSockCred>(data).map(Self)
        }

        fn user_id(&self) -> Uid {
            self.0.sc_uid
        }

        fn group_id(&self) -> Gid {
            self.0.sc_gid
        }
    }

    pub type PlatformCredential = SocketCredential;
}

pub use imp::*;

#[cfg(test)]
#[cfg(any(target_os = "linux", target_os = "android"))]
mod tests {
    use super::*;

    fn ucred_bytes(cred: libc::ucred) -> Vec<u8> {
        let mut bytes = vec![0u8; mem::size_of::<libc::ucred>()];
        // SAFETY: `bytes` is exactly size_of::<ucred>() long.
        unsafe { ptr::write_unaligned(bytes.as_mut_ptr().cast::<libc::ucred>(), cred) };
        bytes
    }

    #[test]
    fn reads_ids_from_exact_length_payload() {
        let bytes = ucred_bytes(libc::ucred {
            pid: 42,
            uid: 1000,
            gid: 100,
        });
        let cred = PlatformCredential::from_bytes(&bytes).unwrap();
        assert_eq!(cred.user_id(), 1000);
        assert_eq!(cred.group_id(), 100);
        assert_eq!(cred.process_id(), 42);
    }

    #[test]
    fn rejects_short_and_long_payloads() {
        let bytes = ucred_bytes(libc::ucred {
            pid: 1,
            uid: 2,
            gid: 3,
        });
        assert!(PlatformCredential::from_bytes(&bytes[..bytes.len() - 1]).is_none());

        let mut longer = bytes.clone();
        longer.push(0);
        assert!(PlatformCredential::from_bytes(&longer).is_none());
        assert!(PlatformCredential::from_bytes(&[]).is_none());
    }

    #[test]
    fn control_capacity_holds_one_credential() {
        assert_eq!(CONTROL_CAPACITY, cmsg_space(PlatformCredential::size()));
        assert!(PlatformCredential::control_len() <= CONTROL_CAPACITY);
    }
}
