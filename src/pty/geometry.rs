//! Terminal geometry for PTY

use std::os::fd::RawFd;

use crate::error::{check_fd, Error, Result};

/// Terminal size in character cells plus the size of one cell in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalGeometry {
    /// Number of rows (lines)
    pub rows: u16,
    /// Number of columns (characters per line)
    pub columns: u16,
    /// Width of one cell in pixels (can be 0)
    pub cell_width: u16,
    /// Height of one cell in pixels (can be 0)
    pub cell_height: u16,
}

impl TerminalGeometry {
    /// Create a geometry without pixel information
    pub fn new(rows: u16, columns: u16) -> Self {
        Self {
            rows,
            columns,
            cell_width: 0,
            cell_height: 0,
        }
    }

    /// Create a geometry with cell dimensions in pixels
    pub fn with_cell_size(rows: u16, columns: u16, cell_width: u16, cell_height: u16) -> Self {
        Self {
            rows,
            columns,
            cell_width,
            cell_height,
        }
    }

    /// columns × cell width, saturating
    pub fn pixel_width(&self) -> u16 {
        self.columns.saturating_mul(self.cell_width)
    }

    /// rows × cell height, saturating
    pub fn pixel_height(&self) -> u16 {
        self.rows.saturating_mul(self.cell_height)
    }

    /// Convert to libc winsize structure
    pub fn to_winsize(&self) -> libc::winsize {
        libc::winsize {
            ws_row: self.rows,
            ws_col: self.columns,
            ws_xpixel: self.pixel_width(),
            ws_ypixel: self.pixel_height(),
        }
    }

    /// Apply character and pixel geometry in one `TIOCSWINSZ`
    pub fn apply(&self, fd: RawFd) -> Result<()> {
        let fd = check_fd(fd)?;
        let ws = self.to_winsize();
        let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &ws) };
        if result == -1 {
            Err(Error::last("ioctl(TIOCSWINSZ)"))
        } else {
            Ok(())
        }
    }

    /// Read the geometry currently set on a terminal descriptor
    pub fn query(fd: RawFd) -> Result<Self> {
        let fd = check_fd(fd)?;
        let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
        let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) };
        if result == -1 {
            Err(Error::last("ioctl(TIOCGWINSZ)"))
        } else {
            Ok(Self::from(ws))
        }
    }
}

impl Default for TerminalGeometry {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

impl From<libc::winsize> for TerminalGeometry {
    fn from(ws: libc::winsize) -> Self {
        Self {
            rows: ws.ws_row,
            columns: ws.ws_col,
            cell_width: ws.ws_xpixel.checked_div(ws.ws_col).unwrap_or(0),
            cell_height: ws.ws_ypixel.checked_div(ws.ws_row).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_geometry_default() {
        let geometry = TerminalGeometry::default();
        assert_eq!(geometry.rows, 24);
        assert_eq!(geometry.columns, 80);
        assert_eq!(geometry.pixel_width(), 0);
    }

    #[test]
    fn test_pixel_dimensions() {
        let geometry = TerminalGeometry::with_cell_size(24, 80, 9, 18);
        let ws = geometry.to_winsize();
        assert_eq!(ws.ws_col, 80);
        assert_eq!(ws.ws_row, 24);
        assert_eq!(ws.ws_xpixel, 720);
        assert_eq!(ws.ws_ypixel, 432);
    }

    #[test]
    fn test_pixel_dimensions_saturate() {
        let geometry = TerminalGeometry::with_cell_size(1000, 1000, 1000, 1000);
        assert_eq!(geometry.pixel_width(), u16::MAX);
        assert_eq!(geometry.pixel_height(), u16::MAX);
    }

    #[test]
    fn test_zero_geometry_from_winsize() {
        let ws = TerminalGeometry::new(0, 0).to_winsize();
        assert_eq!(TerminalGeometry::from(ws), TerminalGeometry::new(0, 0));
    }

    #[test]
    fn test_apply_rejects_negative_fd() {
        assert!(matches!(
            TerminalGeometry::default().apply(-1),
            Err(Error::InvalidDescriptor(-1))
        ));
    }

    proptest! {
        #[test]
        fn cell_size_survives_winsize(
            rows in 1u16..200,
            columns in 1u16..400,
            cell_width in 0u16..40,
            cell_height in 0u16..80,
        ) {
            let geometry = TerminalGeometry::with_cell_size(rows, columns, cell_width, cell_height);
            prop_assume!(geometry.pixel_width() < u16::MAX && geometry.pixel_height() < u16::MAX);
            prop_assert_eq!(TerminalGeometry::from(geometry.to_winsize()), geometry);
        }
    }
}
