//! Message fixtures shared by the unit tests.

use crate::message::Message;

#[derive(Debug, Clone, Copy)]
pub enum Fixture {
    Plain,
    Encrypted,
    FakeEncrypted,
    Literal,
    Mdn,
}

impl Fixture {
    fn template(self) -> &'static str {
        match self {
            Fixture::Plain => include_str!("../testdata/plain.eml"),
            Fixture::Encrypted => include_str!("../testdata/encrypted.eml"),
            Fixture::FakeEncrypted => include_str!("../testdata/fake-encrypted.eml"),
            Fixture::Literal => include_str!("../testdata/literal.eml"),
            Fixture::Mdn => include_str!("../testdata/mdn.eml"),
        }
    }
}

/// Fills in the template and converts it to the CRLF line endings the MTA
/// streams to the milter.
pub fn render(fixture: Fixture, from: &str, to: &str, subject: &str) -> String {
    fixture
        .template()
        .replace("{{from}}", from)
        .replace("{{to}}", to)
        .replace("{{subject}}", subject)
        .replace('\n', "\r\n")
}

pub fn load_message(fixture: Fixture, from: &str, to: &str, subject: &str) -> Message {
    Message::parse(render(fixture, from, to, subject).as_bytes()).unwrap()
}
