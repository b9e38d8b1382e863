// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Locale preference XML codec.
//!
//! Both the backup payload handed to the backup transport, and the stage files
//! kept on disk use the same tiny XML layout:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8" standalone="yes"?>
//! <locales creationTimeMillis="1700000000000">
//!   <package name="com.example.app" locales="en-US,fr-FR"/>
//! </locales>
//! ```
//!
//! The `creationTimeMillis` attribute is only written for stage files. Backup
//! payloads omit it.
//!
//! # Leniency
//!
//! Decoding only looks at direct children of the root `locales` element.
//! Unknown children, deeper nesting, and package entries with a blank name or
//! blank language tags are skipped. A missing or malformed timestamp is
//! reported as absent rather than an error.

use quick_xml::{
    events::{attributes::Attribute, BytesDecl, BytesEnd, BytesStart, Event},
    Reader, Writer,
};
use std::{collections::BTreeMap, io::Cursor};

pub const LOCALES_TAG: &str = "locales";
pub const PACKAGE_TAG: &str = "package";
pub const ATTR_PACKAGE_NAME: &str = "name";
pub const ATTR_LOCALES: &str = "locales";
pub const ATTR_CREATION_TIME_MILLIS: &str = "creationTimeMillis";

/// Mapping of package name to comma separated language tags.
///
/// Ordered so that encoded output is deterministic.
pub type PackageStates = BTreeMap<String, String>;

/// Result of decoding a locale document.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct LocaleDocument {
    /// Creation timestamp of stage data, if present and well formed.
    pub creation_time_millis: Option<i64>,

    /// Package entries found in document.
    pub package_states: PackageStates,
}

/// Encode package states into XML.
///
/// Writes the `creationTimeMillis` attribute only when `creation_time_millis`
/// is given.
///
/// # Invariant
///
/// - Empty package states encode to zero bytes. No root element is written.
///
/// # Errors
///
/// - Return [`CodecError::Io`] or [`CodecError::Xml`] if the XML writer
///   fails.
pub fn encode(states: &PackageStates, creation_time_millis: Option<i64>) -> Result<Vec<u8>> {
    if states.is_empty() {
        return Ok(Vec::new());
    }

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

    let mut root = BytesStart::new(LOCALES_TAG);
    if let Some(millis) = creation_time_millis {
        root.push_attribute((ATTR_CREATION_TIME_MILLIS, millis.to_string().as_str()));
    }
    writer.write_event(Event::Start(root))?;

    for (package_name, tags) in states {
        let entry = BytesStart::new(PACKAGE_TAG).with_attributes([
            (ATTR_PACKAGE_NAME, package_name.as_str()),
            (ATTR_LOCALES, tags.as_str()),
        ]);
        writer.write_event(Event::Empty(entry))?;
    }

    writer.write_event(Event::End(BytesEnd::new(LOCALES_TAG)))?;

    Ok(writer.into_inner().into_inner())
}

/// Decode XML into package states.
///
/// # Errors
///
/// - Return [`CodecError::Xml`] if markup is malformed.
/// - Return [`CodecError::MissingRoot`] if document has no root element.
/// - Return [`CodecError::UnexpectedRoot`] if root element is not `locales`.
pub fn decode(data: &[u8]) -> Result<LocaleDocument> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut document = LocaleDocument::default();

    // INVARIANT: Locate root element before anything else.
    let root_is_empty = loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => {
                expect_root(&start)?;
                document.creation_time_millis = creation_time(&reader, &start)?;
                break false;
            }
            Event::Empty(start) => {
                expect_root(&start)?;
                document.creation_time_millis = creation_time(&reader, &start)?;
                break true;
            }
            Event::Eof => return Err(CodecError::MissingRoot),
            _ => {}
        }
        buf.clear();
    };
    buf.clear();

    if root_is_empty {
        return Ok(document);
    }

    // INVARIANT: Only direct children of the root are considered.
    let mut depth = 1usize;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => {
                if depth == 1 && start.name().as_ref() == PACKAGE_TAG.as_bytes() {
                    read_package(&reader, &start, &mut document.package_states)?;
                }
                depth += 1;
            }
            Event::Empty(start) => {
                if depth == 1 && start.name().as_ref() == PACKAGE_TAG.as_bytes() {
                    read_package(&reader, &start, &mut document.package_states)?;
                }
            }
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(document)
}

fn expect_root(start: &BytesStart<'_>) -> Result<()> {
    if start.name().as_ref() != LOCALES_TAG.as_bytes() {
        return Err(CodecError::UnexpectedRoot(
            String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ));
    }

    Ok(())
}

fn creation_time(reader: &Reader<&[u8]>, start: &BytesStart<'_>) -> Result<Option<i64>> {
    Ok(attribute_value(reader, start, ATTR_CREATION_TIME_MILLIS)?
        .and_then(|value| value.trim().parse::<i64>().ok()))
}

fn read_package(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
    states: &mut PackageStates,
) -> Result<()> {
    let package_name = attribute_value(reader, start, ATTR_PACKAGE_NAME)?.unwrap_or_default();
    let tags = attribute_value(reader, start, ATTR_LOCALES)?.unwrap_or_default();

    if !package_name.is_empty() && !tags.is_empty() {
        states.insert(package_name, tags);
    }

    Ok(())
}

fn attribute_value(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
    key: &str,
) -> Result<Option<String>> {
    for attribute in start.attributes() {
        let attribute: Attribute<'_> = attribute.map_err(quick_xml::Error::from)?;
        if attribute.key.as_ref() == key.as_bytes() {
            let value = attribute.decode_and_unescape_value(reader.decoder())?;
            return Ok(Some(value.into_owned()));
        }
    }

    Ok(None)
}

/// Codec error types.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Markup could not be read or written.
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    /// Output buffer could not be written.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Document contains no root element.
    #[error("document has no root element, expected <locales>")]
    MissingRoot,

    /// Document root is not the locales element.
    #[error("unexpected root element <{0}>, expected <locales>")]
    UnexpectedRoot(String),
}

/// Friendly result alias :3
pub type Result<T, E = CodecError> = std::result::Result<T, E>;
