/// Append-only assembly text.
#[derive(Debug, Default)]
pub struct Buf {
    text: String,
}

impl Buf {
    pub fn new() -> Buf {
        Buf::default()
    }

    pub fn append(&mut self, s: impl AsRef<str>) {
        self.text.push_str(s.as_ref());
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}
