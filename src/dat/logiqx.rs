//! Logiqx XML DAT parser. The internal DTD id is what identifies the
//! dialect; files without it are "not this format", never an error.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};
use crate::rom::Rom;

use super::{catalog_rom, DatMeta, Game, Release};

const DTD_ID: &str = "-//Logiqx//DTD ROM Management Datafile//EN";

/// Probe and parse. `Ok(None)` when the DOCTYPE does not carry the
/// Logiqx DTD id; malformed XML past that gate is a content error.
pub fn parse(text: &str) -> Result<Option<(DatMeta, Vec<Game>)>> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut doctype_ok = false;
    let mut meta = DatMeta::default();
    let mut games: Vec<Game> = Vec::new();
    let mut current: Option<Game> = None;
    let mut in_header = false;
    let mut header_field: Option<String> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                if doctype_ok {
                    return Err(Error::content(format!("malformed Logiqx DAT: {e}")));
                }
                return Ok(None);
            }
        };
        match event {
            Event::DocType(doctype) => {
                if String::from_utf8_lossy(doctype.as_ref()).contains(DTD_ID) {
                    doctype_ok = true;
                }
            }
            Event::Start(e) => {
                if !doctype_ok {
                    return Ok(None);
                }
                match e.name().as_ref() {
                    b"datafile" => {}
                    b"header" => in_header = true,
                    b"game" | b"machine" => current = Some(game_from_attrs(&e)?),
                    b"release" => {
                        if let Some(game) = current.as_mut() {
                            game.releases.push(release_from_attrs(&e)?);
                        }
                    }
                    b"rom" | b"disk" => {
                        if let Some(game) = current.as_mut() {
                            game.roms.push(rom_from_attrs(&e)?);
                        }
                    }
                    other if in_header => {
                        header_field = Some(String::from_utf8_lossy(other).into_owned());
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if !doctype_ok {
                    return Ok(None);
                }
                match e.name().as_ref() {
                    b"game" | b"machine" => games.push(game_from_attrs(&e)?),
                    b"release" => {
                        if let Some(game) = current.as_mut() {
                            game.releases.push(release_from_attrs(&e)?);
                        }
                    }
                    b"rom" | b"disk" => {
                        if let Some(game) = current.as_mut() {
                            game.roms.push(rom_from_attrs(&e)?);
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if in_header {
                    if let Some(field) = header_field.take() {
                        let value = t.unescape().unwrap_or_default().into_owned();
                        match field.as_str() {
                            "name" => meta.name = Some(value),
                            "description" => meta.description = Some(value),
                            "version" => meta.version = Some(value),
                            "date" => meta.date = Some(value),
                            "author" => meta.author = Some(value),
                            "homepage" | "url" => meta.url = Some(value),
                            _ => {}
                        }
                    }
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"header" => {
                    in_header = false;
                    header_field = None;
                }
                b"game" | b"machine" => {
                    if let Some(game) = current.take() {
                        games.push(game);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !doctype_ok {
        return Ok(None);
    }
    Ok(Some((meta, games)))
}

fn attr_value(attr: &quick_xml::events::attributes::Attribute) -> Result<String> {
    Ok(attr
        .unescape_value()
        .map_err(|e| Error::content(format!("bad attribute value: {e}")))?
        .into_owned())
}

fn game_from_attrs(e: &BytesStart) -> Result<Game> {
    let mut name = None;
    let mut cloneof = None;
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::content(format!("bad game attribute: {err}")))?;
        let value = attr_value(&attr)?;
        match attr.key.as_ref() {
            b"name" => name = Some(value),
            b"cloneof" => cloneof = Some(value),
            _ => {}
        }
    }
    let name = name.ok_or_else(|| Error::content("game without a name attribute"))?;
    Ok(Game {
        name,
        description: None,
        cloneof,
        roms: Vec::new(),
        releases: Vec::new(),
    })
}

fn release_from_attrs(e: &BytesStart) -> Result<Release> {
    let mut name = None;
    let mut region = None;
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::content(format!("bad release attribute: {err}")))?;
        let value = attr_value(&attr)?;
        match attr.key.as_ref() {
            b"name" => name = Some(value),
            b"region" => region = Some(value),
            _ => {}
        }
    }
    let name = name.ok_or_else(|| Error::content("release without a name attribute"))?;
    Ok(Release { name, region })
}

fn rom_from_attrs(e: &BytesStart) -> Result<Rom> {
    let mut name = None;
    let mut size: Option<u64> = None;
    let mut crc = None;
    let mut md5 = None;
    let mut sha1 = None;
    let mut sha256 = None;
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::content(format!("bad rom attribute: {err}")))?;
        let value = attr_value(&attr)?;
        match attr.key.as_ref() {
            b"name" => name = Some(value),
            b"size" => {
                size = Some(
                    value
                        .parse()
                        .map_err(|_| Error::content(format!("bad rom size {value:?}")))?,
                )
            }
            b"crc" => crc = Some(value),
            b"md5" => md5 = Some(value),
            b"sha1" => sha1 = Some(value),
            b"sha256" => sha256 = Some(value),
            _ => {}
        }
    }
    let name = name.ok_or_else(|| Error::content("rom without a name attribute"))?;
    catalog_rom(
        &name,
        size,
        crc.as_deref(),
        md5.as_deref(),
        sha1.as_deref(),
        sha256.as_deref(),
    )
}
