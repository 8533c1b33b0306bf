//! Incremental splitter for a top-level JSON array.
//!
//! Bytes may arrive in chunks of any size. Each array element is handed back
//! as soon as its last byte has been seen; only the unfinished tail of the
//! document stays buffered.

use anyhow::bail;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Between,
    Element,
    Done,
}

#[derive(Debug)]
pub struct JsonArraySplitter {
    buf: Vec<u8>,
    pos: usize,
    consumed: usize,
    phase: Phase,
    element_start: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Default for JsonArraySplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonArraySplitter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            consumed: 0,
            phase: Phase::Start,
            element_start: 0,
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// True once the closing bracket of the array has been consumed.
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Feed the next chunk and collect every element it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut elements = Vec::new();
        self.buf.extend_from_slice(chunk);

        while self.pos < self.buf.len() {
            let byte = self.buf[self.pos];
            match self.phase {
                Phase::Start => {
                    if byte == b'[' {
                        self.phase = Phase::Between;
                    } else if !byte.is_ascii_whitespace() {
                        bail!(
                            "expected '[' at byte {}, found {:?}",
                            self.offset(),
                            byte as char
                        );
                    }
                }
                Phase::Between => match byte {
                    b']' => self.phase = Phase::Done,
                    b',' => {}
                    b if b.is_ascii_whitespace() => {}
                    _ => {
                        self.phase = Phase::Element;
                        self.element_start = self.pos;
                        self.depth = 0;
                        self.in_string = false;
                        self.escaped = false;
                        continue;
                    }
                },
                Phase::Element => {
                    if self.in_string {
                        if self.escaped {
                            self.escaped = false;
                        } else if byte == b'\\' {
                            self.escaped = true;
                        } else if byte == b'"' {
                            self.in_string = false;
                        }
                    } else {
                        match byte {
                            b'"' => self.in_string = true,
                            b'{' | b'[' => self.depth += 1,
                            b'}' | b']' if self.depth > 0 => {
                                self.depth -= 1;
                                if self.depth == 0 {
                                    elements
                                        .push(self.buf[self.element_start..=self.pos].to_vec());
                                    self.phase = Phase::Between;
                                }
                            }
                            // scalar element ends at the delimiter, which is
                            // then handled again by the Between phase
                            b',' | b']' if self.depth == 0 => {
                                elements.push(self.buf[self.element_start..self.pos].to_vec());
                                self.phase = Phase::Between;
                                continue;
                            }
                            b'}' if self.depth == 0 => {
                                bail!("unbalanced '}}' at byte {}", self.offset());
                            }
                            b if self.depth == 0 && b.is_ascii_whitespace() => {
                                elements.push(self.buf[self.element_start..self.pos].to_vec());
                                self.phase = Phase::Between;
                            }
                            _ => {}
                        }
                    }
                }
                Phase::Done => {
                    if !byte.is_ascii_whitespace() {
                        bail!("unexpected data after array at byte {}", self.offset());
                    }
                }
            }
            self.pos += 1;
        }

        self.compact();
        Ok(elements)
    }

    /// Confirm the document ended with a closed array.
    pub fn finish(&self) -> anyhow::Result<()> {
        match self.phase {
            Phase::Done => Ok(()),
            Phase::Start => bail!("document is empty"),
            Phase::Between | Phase::Element => {
                bail!("array not terminated after {} bytes", self.offset())
            }
        }
    }

    fn offset(&self) -> usize {
        self.consumed + self.pos
    }

    fn compact(&mut self) {
        let keep_from = if self.phase == Phase::Element {
            self.element_start
        } else {
            self.pos
        };
        if keep_from == 0 {
            return;
        }
        self.buf.drain(..keep_from);
        self.consumed += keep_from;
        self.pos -= keep_from;
        self.element_start = self.element_start.saturating_sub(keep_from);
    }
}
