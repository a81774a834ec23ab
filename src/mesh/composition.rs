//! Composition data page 0 decoder.

use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub loc: u16,
    pub sig_models: Vec<u16>,
    /// `(company_id, model_id)`
    pub vendor_models: Vec<(u16, u16)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionData {
    pub cid: u16,
    pub pid: u16,
    pub vid: u16,
    pub crpl: u16,
    pub features: u16,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncated;

impl fmt::Display for Truncated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "composition data truncated")
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u8(&mut self) -> Result<u8, Truncated> {
        let b = *self.buf.get(self.pos).ok_or(Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, Truncated> {
        Ok(u16::from_le_bytes([self.u8()?, self.u8()?]))
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }
}

impl CompositionData {
    /// Decode page 0 (all fields little-endian).
    pub fn parse(data: &[u8]) -> Result<Self, Truncated> {
        let mut r = Reader { buf: data, pos: 0 };
        let cid = r.u16()?;
        let pid = r.u16()?;
        let vid = r.u16()?;
        let crpl = r.u16()?;
        let features = r.u16()?;

        let mut elements = Vec::new();
        while r.remaining() > 0 {
            let loc = r.u16()?;
            let num_s = r.u8()?;
            let num_v = r.u8()?;
            let sig_models = (0..num_s).map(|_| r.u16()).collect::<Result<Vec<_>, _>>()?;
            let vendor_models = (0..num_v)
                .map(|_| Ok((r.u16()?, r.u16()?)))
                .collect::<Result<Vec<_>, Truncated>>()?;
            elements.push(Element {
                loc,
                sig_models,
                vendor_models,
            });
        }

        Ok(Self {
            cid,
            pid,
            vid,
            crpl,
            features,
            elements,
        })
    }
}

impl fmt::Display for CompositionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CID 0x{:04x} PID 0x{:04x} VID 0x{:04x} CRPL 0x{:04x} features 0x{:x}",
            self.cid, self.pid, self.vid, self.crpl, self.features
        )?;
        for e in &self.elements {
            write!(f, " | loc 0x{:x} sig[", e.loc)?;
            for m in &e.sig_models {
                write!(f, " 0x{m:04x}")?;
            }
            write!(f, " ] vnd[")?;
            for (cid, id) in &e.vendor_models {
                write!(f, " 0x{cid:04x}:0x{id:04x}")?;
            }
            write!(f, " ]")?;
        }
        Ok(())
    }
}
