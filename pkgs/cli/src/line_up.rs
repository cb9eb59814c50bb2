use std::io::{self, Read};

/// Buffer size used when none is given.
pub const DEFAULT_BUFSIZE: usize = 8192;

#[derive(thiserror::Error, Debug)]
pub enum LineError<E> {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
    #[error("line does not fit the {0} byte buffer")]
    TooLong(usize),
    #[error("{0}")]
    Handler(E),
}

/// Outcome of a single [`LineUp::read_from`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Data,
    Eof,
}

/// Assembles a byte stream into lines.
///
/// CR and LF both end a line, so CRLF yields an extra empty line. Bytes after the
/// last line break are kept until more data arrives or [`LineUp::finish`] is called.
pub struct LineUp {
    buf: Vec<u8>,
    limit: usize,
}

impl LineUp {
    /// Creates a line assembler holding at most `bufsize` pending bytes (0 picks the default).
    pub fn new(bufsize: usize) -> Self {
        let limit = if bufsize == 0 {
            DEFAULT_BUFSIZE
        } else {
            bufsize
        };
        LineUp {
            buf: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Drops any partial line.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Bytes of the unfinished line.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Appends `data` and hands every completed line to `handler`.
    pub fn feed<E, F>(&mut self, mut data: &[u8], handler: &mut F) -> Result<(), LineError<E>>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
    {
        while !data.is_empty() {
            let room = self.limit - self.buf.len();
            if room == 0 {
                return Err(LineError::TooLong(self.limit));
            }

            let take = room.min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            self.process(handler)?;
        }
        Ok(())
    }

    /// Performs a single read from `reader` and processes the lines it completed.
    pub fn read_from<R, E, F>(
        &mut self,
        reader: &mut R,
        handler: &mut F,
    ) -> Result<ReadStatus, LineError<E>>
    where
        R: Read,
        F: FnMut(&[u8]) -> Result<(), E>,
    {
        let filled = self.buf.len();
        if filled == self.limit {
            return Err(LineError::TooLong(self.limit));
        }

        self.buf.resize(self.limit, 0);
        let read = loop {
            match reader.read(&mut self.buf[filled..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(filled);
                    return Err(e.into());
                }
            }
        };
        self.buf.truncate(filled + read);

        if read == 0 {
            return Ok(ReadStatus::Eof);
        }
        self.process(handler)?;
        Ok(ReadStatus::Data)
    }

    /// Hands a trailing unterminated line to `handler`, if there is one.
    pub fn finish<E, F>(&mut self, handler: &mut F) -> Result<(), LineError<E>>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
    {
        if self.buf.is_empty() {
            return Ok(());
        }
        let result = handler(&self.buf[..]).map_err(LineError::Handler);
        self.buf.clear();
        result
    }

    /// Reads `reader` to the end, handing every line (including an unterminated last one) to `handler`.
    pub fn process_reader<R, E, F>(
        reader: &mut R,
        bufsize: usize,
        handler: &mut F,
    ) -> Result<(), LineError<E>>
    where
        R: Read,
        F: FnMut(&[u8]) -> Result<(), E>,
    {
        let mut lines = LineUp::new(bufsize);
        while lines.read_from(reader, handler)? == ReadStatus::Data {}
        lines.finish(handler)
    }

    /// Emits every complete line in the buffer and keeps the remainder.
    fn process<E, F>(&mut self, handler: &mut F) -> Result<(), LineError<E>>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
    {
        let mut start = 0;
        while let Some(pos) = self.buf[start..]
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
        {
            let end = start + pos;
            let result = handler(&self.buf[start..end]);
            start = end + 1;

            if let Err(e) = result {
                self.buf.drain(..start);
                return Err(LineError::Handler(e));
            }
        }
        self.buf.drain(..start);
        Ok(())
    }
}
