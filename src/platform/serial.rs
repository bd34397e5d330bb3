// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Serial line setup with termios: raw mode, baud, character format and,
// on Linux, the RS-232 / RS-485 switch of the driver.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;

use crate::config::{Parity, SerialConfig, SerialMode};

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        50 => libc::B50,
        75 => libc::B75,
        110 => libc::B110,
        134 => libc::B134,
        150 => libc::B150,
        200 => libc::B200,
        300 => libc::B300,
        600 => libc::B600,
        1200 => libc::B1200,
        1800 => libc::B1800,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460800 => libc::B460800,
        #[cfg(target_os = "linux")]
        500000 => libc::B500000,
        #[cfg(target_os = "linux")]
        576000 => libc::B576000,
        #[cfg(target_os = "linux")]
        921600 => libc::B921600,
        #[cfg(target_os = "linux")]
        1000000 => libc::B1000000,
        #[cfg(target_os = "linux")]
        1152000 => libc::B1152000,
        #[cfg(target_os = "linux")]
        1500000 => libc::B1500000,
        #[cfg(target_os = "linux")]
        2000000 => libc::B2000000,
        #[cfg(target_os = "linux")]
        2500000 => libc::B2500000,
        #[cfg(target_os = "linux")]
        3000000 => libc::B3000000,
        #[cfg(target_os = "linux")]
        3500000 => libc::B3500000,
        #[cfg(target_os = "linux")]
        4000000 => libc::B4000000,
        _ => return None,
    };
    Some(speed)
}

/// Open `config.device` non-blocking and configure it for RTU.
pub fn open_serial(config: &SerialConfig) -> io::Result<OwnedFd> {
    let speed = baud_constant(config.baud).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported baud rate {}", config.baud),
        )
    })?;
    let path = CString::new(config.device.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let raw = unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
        )
    };
    if raw == -1 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd.as_raw_fd(), &mut tio) } != 0 {
        return Err(io::Error::last_os_error());
    }
    unsafe { libc::cfmakeraw(&mut tio) };
    if unsafe { libc::cfsetispeed(&mut tio, speed) } != 0
        || unsafe { libc::cfsetospeed(&mut tio, speed) } != 0
    {
        return Err(io::Error::last_os_error());
    }

    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cflag &= !libc::CSIZE;
    tio.c_cflag |= match config.data_bits {
        5 => libc::CS5,
        6 => libc::CS6,
        7 => libc::CS7,
        _ => libc::CS8,
    };
    if config.stop_bits == 2 {
        tio.c_cflag |= libc::CSTOPB;
    } else {
        tio.c_cflag &= !libc::CSTOPB;
    }
    match config.parity {
        Parity::None => {
            tio.c_cflag &= !libc::PARENB;
            tio.c_iflag &= !libc::INPCK;
        }
        Parity::Even => {
            tio.c_cflag |= libc::PARENB;
            tio.c_cflag &= !libc::PARODD;
            tio.c_iflag |= libc::INPCK;
        }
        Parity::Odd => {
            tio.c_cflag |= libc::PARENB | libc::PARODD;
            tio.c_iflag |= libc::INPCK;
        }
    }
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = 0;

    if unsafe { libc::tcsetattr(fd.as_raw_fd(), libc::TCSANOW, &tio) } != 0 {
        return Err(io::Error::last_os_error());
    }
    set_mode(&fd, config.mode)?;
    unsafe { libc::tcflush(fd.as_raw_fd(), libc::TCIOFLUSH) };
    Ok(fd)
}

#[cfg(target_os = "linux")]
fn set_mode(fd: &OwnedFd, mode: SerialMode) -> io::Result<()> {
    // struct serial_rs485 from <linux/serial.h>
    #[repr(C)]
    #[derive(Default)]
    struct SerialRs485 {
        flags: u32,
        delay_rts_before_send: u32,
        delay_rts_after_send: u32,
        padding: [u32; 5],
    }
    const TIOCGRS485: libc::c_ulong = 0x542E;
    const TIOCSRS485: libc::c_ulong = 0x542F;
    const SER_RS485_ENABLED: u32 = 1;

    let enable = match mode {
        SerialMode::Unchanged => return Ok(()),
        SerialMode::Rs232 => false,
        SerialMode::Rs485 => true,
    };
    let mut conf = SerialRs485::default();
    if unsafe { libc::ioctl(fd.as_raw_fd(), TIOCGRS485 as _, &mut conf) } != 0 {
        return Err(io::Error::last_os_error());
    }
    if enable {
        conf.flags |= SER_RS485_ENABLED;
    } else {
        conf.flags &= !SER_RS485_ENABLED;
    }
    if unsafe { libc::ioctl(fd.as_raw_fd(), TIOCSRS485 as _, &conf) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_mode(_fd: &OwnedFd, mode: SerialMode) -> io::Result<()> {
    match mode {
        SerialMode::Unchanged | SerialMode::Rs232 => Ok(()),
        SerialMode::Rs485 => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "RS-485 mode is only supported on Linux",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_rates_are_supported() {
        for baud in [1200, 9600, 19200, 38400, 115200] {
            assert!(baud_constant(baud).is_some(), "{baud}");
        }
        assert!(baud_constant(12345).is_none());
    }

    #[test]
    fn missing_device_fails() {
        let config = SerialConfig::new("/dev/this-device-does-not-exist");
        assert!(open_serial(&config).is_err());
    }
}
