use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

impl Loc {
    /// Locate a character offset. Offsets past the end clamp to the last position.
    pub fn from_offset(src: &[char], offset: usize) -> Loc {
        let offset = offset.min(src.len());
        let mut line = 1;
        let mut col = 1;
        for &c in &src[..offset] {
            if c == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        Loc { line, col }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// The source line owning an offset, with `[` `]` inserted around the
/// offending character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub loc: Loc,
    pub marked: String,
}

impl Snippet {
    pub fn at(src: &[char], offset: usize) -> Snippet {
        let offset = offset.min(src.len());
        let start = src[..offset]
            .iter()
            .rposition(|&c| c == '\n')
            .map_or(0, |i| i + 1);
        let end = src[offset..]
            .iter()
            .position(|&c| c == '\n')
            .map_or(src.len(), |i| offset + i);

        let mut marked: String = src[start..offset].iter().collect();
        marked.push('[');
        if offset < end {
            marked.push(src[offset]);
        }
        marked.push(']');
        if offset < end {
            marked.extend(&src[offset + 1..end]);
        }

        Snippet {
            loc: Loc::from_offset(src, offset),
            marked,
        }
    }
}

impl fmt::Display for Snippet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.loc.line, self.marked)
    }
}
