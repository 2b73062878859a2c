//! Bounds-checked reader over a borrowed byte buffer.

/// A read position over a byte slice.
///
/// Every read checks the remaining length first and reports how many bytes
/// were needed, so a truncated buffer can never be indexed past its end.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// A read that would run past the end of the buffer.
///
/// `needed` is the absolute buffer length the read required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBounds {
    pub needed: usize,
    pub got: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail unless at least `n` more bytes are available.
    pub fn require(&self, n: usize) -> Result<(), OutOfBounds> {
        if self.remaining() < n {
            return Err(OutOfBounds {
                needed: self.pos + n,
                got: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, OutOfBounds> {
        self.require(1)?;
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Big-endian u16.
    pub fn read_u16(&mut self) -> Result<u16, OutOfBounds> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_be_bytes(bytes))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], OutOfBounds> {
        self.require(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], OutOfBounds> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), OutOfBounds> {
        self.read_bytes(n).map(|_| ())
    }

    /// Everything after the current position.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}
