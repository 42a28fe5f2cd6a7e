//! Tap device: opens `/dev/net/tun` in TAP mode and exposes raw
//! Ethernet frame read/write. No `NetDevice` trait here, there is
//! exactly one device for the process's lifetime, so the registry and
//! `DeviceHandle` indirection a multi-NIC stack would need buys nothing.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd};

use tapstack_abi::error::StackError;

const TUNSETIFF: libc::c_ulong = 0x400454CA;
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;
const IFNAMSIZ: usize = 16;

/// Mirrors the kernel's `struct ifreq` closely enough for `TUNSETIFF`:
/// a null-terminated interface name followed by a flags field. The
/// kernel only touches these two members for this ioctl.
#[repr(C)]
struct IfReq {
    ifr_name: [u8; IFNAMSIZ],
    ifr_flags: libc::c_short,
    _padding: [u8; 22],
}

/// An open tap interface. Reads return one Ethernet frame per call
/// (tap devices are message-oriented); writes must submit one complete
/// frame at a time.
pub struct TapDevice {
    file: File,
    mtu: usize,
}

const DEFAULT_MTU: usize = 1500;
/// Ethernet header (14 bytes) on top of the MTU, with slack for VLAN
/// tags the codecs don't otherwise expect.
const READ_BUF_LEN: usize = DEFAULT_MTU + 18;

impl TapDevice {
    /// Open `name` (e.g. `"tap7"`) as a tap interface, creating it if
    /// the interface doesn't already exist and the caller has
    /// `CAP_NET_ADMIN`.
    pub fn open(name: &str) -> Result<Self, StackError> {
        if name.len() >= IFNAMSIZ {
            return Err(StackError::InvalidArgument);
        }

        let path = std::ffi::CString::new("/dev/net/tun").unwrap();
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(StackError::Device(format!(
                "open /dev/net/tun: {}",
                io::Error::last_os_error()
            )));
        }
        let file = unsafe { File::from_raw_fd(fd) };

        let mut ifr = IfReq {
            ifr_name: [0u8; IFNAMSIZ],
            ifr_flags: IFF_TAP | IFF_NO_PI,
            _padding: [0u8; 22],
        };
        ifr.ifr_name[..name.len()].copy_from_slice(name.as_bytes());

        let res = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &ifr as *const IfReq) };
        if res < 0 {
            return Err(StackError::Device(format!(
                "TUNSETIFF {name}: {}",
                io::Error::last_os_error()
            )));
        }

        Ok(Self {
            file,
            mtu: DEFAULT_MTU,
        })
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Block until one frame is available and return its raw bytes.
    pub fn read_frame(&mut self) -> Result<Vec<u8>, StackError> {
        let mut buf = vec![0u8; READ_BUF_LEN];
        let n = self
            .file
            .read(&mut buf)
            .map_err(|e| StackError::Device(e.to_string()))?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write one complete Ethernet frame.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<(), StackError> {
        self.file
            .write_all(frame)
            .map_err(|e| StackError::Device(e.to_string()))
    }

    /// A second handle onto the same fd for a dedicated writer thread,
    /// sharing the kernel file description (reads and writes on tap fds
    /// don't interleave state the way a seekable file's offset would).
    pub fn try_clone(&self) -> Result<Self, StackError> {
        let file = self
            .file
            .try_clone()
            .map_err(|e| StackError::Device(e.to_string()))?;
        Ok(Self {
            file,
            mtu: self.mtu,
        })
    }
}
