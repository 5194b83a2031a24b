//! MusicXML parser — converts MusicXML XML into the Score data model.
//!
//! Only the playback-relevant subset is extracted: pitches, durations,
//! ties, articulations, dynamics, tempo marks, navigation (`<sound>`
//! flags, segno/coda) and repeat barlines. Everything else is skipped.

use roxmltree::{Document, Node};

use crate::error::Error;
use crate::model::*;

/// Parse a MusicXML XML string into a Score.
pub fn parse_musicxml(xml: &str) -> Result<Score, Error> {
    // MusicXML files include a DOCTYPE declaration, so we must allow DTDs
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = Document::parse_with_options(xml, options)
        .map_err(|e| Error::Parse(e.to_string()))?;
    let root = doc.root_element();

    // Verify this is a score-partwise document
    if root.tag_name().name() != "score-partwise" {
        return Err(Error::Unsupported(format!(
            "root element '{}'; only 'score-partwise' is supported",
            root.tag_name().name()
        )));
    }

    let mut score = Score::new();
    score.version = root.attribute("version").map(String::from);

    for child in root.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "work" => parse_work(&child, &mut score),
            "identification" => parse_identification(&child, &mut score),
            "part-list" => parse_part_list(&child, &mut score),
            "part" => parse_part(&child, &mut score),
            _ => {}
        }
    }

    Ok(score)
}

// ─── Metadata ────────────────────────────────────────────────────────

fn parse_work(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "work-title" {
            score.title = child.text().map(|t| t.trim().to_string());
        }
    }
}

fn parse_identification(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "creator"
            && child.attribute("type") == Some("composer")
        {
            score.composer = child.text().map(|t| t.trim().to_string());
        }
    }
}

// ─── Part List ───────────────────────────────────────────────────────

fn parse_part_list(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() != "score-part" {
            continue;
        }
        let id = child.attribute("id").unwrap_or("").to_string();
        let mut part = Part {
            id: id.clone(),
            name: String::new(),
            instruments: Vec::new(),
            measures: Vec::new(),
        };

        for sp_child in child.children().filter(|n| n.is_element()) {
            match sp_child.tag_name().name() {
                "part-name" => {
                    part.name = sp_child.text().unwrap_or("").trim().to_string();
                }
                "score-instrument" => {
                    let inst_id = sp_child.attribute("id").unwrap_or("").to_string();
                    let mut name = String::new();
                    for ic in sp_child.children().filter(|n| n.is_element()) {
                        if ic.tag_name().name() == "instrument-name" {
                            name = ic.text().unwrap_or("").trim().to_string();
                        }
                    }
                    part.instruments.push(Instrument {
                        id: inst_id,
                        name,
                        midi_program: None,
                        midi_channel: None,
                    });
                }
                "midi-instrument" => {
                    let inst_id = sp_child.attribute("id").unwrap_or("");
                    let mut program = None;
                    let mut channel = None;
                    for midi in sp_child.children().filter(|n| n.is_element()) {
                        match midi.tag_name().name() {
                            // MusicXML midi-program is 1-based; keep 0-based GM
                            "midi-program" => {
                                program = parse_i32(&midi).map(|p| (p - 1).max(0));
                            }
                            "midi-channel" => channel = parse_i32(&midi),
                            _ => {}
                        }
                    }
                    if let Some(inst) = part.instruments.iter_mut().find(|i| i.id == inst_id) {
                        inst.midi_program = program;
                        inst.midi_channel = channel;
                    }
                }
                _ => {}
            }
        }

        // A part with no declared instruments still needs one playable line
        if part.instruments.is_empty() {
            part.instruments.push(Instrument {
                id: format!("{id}-I1"),
                name: part.name.clone(),
                midi_program: None,
                midi_channel: None,
            });
        }

        score.parts.push(part);
    }
}

// ─── Part Body ───────────────────────────────────────────────────────

fn parse_part(node: &Node, score: &mut Score) {
    let part_id = node.attribute("id").unwrap_or("");
    let part = match score.parts.iter_mut().find(|p| p.id == part_id) {
        Some(p) => p,
        None => {
            log::warn!("part '{part_id}' has no <score-part> declaration, skipping");
            return;
        }
    };

    for m_node in node.children().filter(|n| n.is_element()) {
        if m_node.tag_name().name() != "measure" {
            continue;
        }
        part.measures.push(parse_measure(&m_node));
    }
}

fn parse_measure(node: &Node) -> Measure {
    let number = node
        .attribute("number")
        .and_then(|n| n.parse::<i32>().ok())
        .unwrap_or(0);
    let implicit = node.attribute("implicit") == Some("yes");

    let mut measure = Measure {
        number,
        implicit,
        attributes: None,
        notes: Vec::new(),
        directions: Vec::new(),
        barlines: Vec::new(),
    };

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "attributes" => measure.attributes = Some(parse_attributes(&child)),
            "note" => measure.notes.push(parse_note(&child)),
            "direction" => {
                if let Some(dir) = parse_direction(&child) {
                    measure.directions.push(dir);
                }
            }
            "sound" => {
                // A bare <sound> outside <direction> carries the same flags
                if let Some(dir) = parse_sound(&child) {
                    measure.directions.push(dir);
                }
            }
            "barline" => measure.barlines.push(parse_barline(&child)),
            _ => {}
        }
    }

    measure
}

fn parse_attributes(node: &Node) -> Attributes {
    let mut attrs = Attributes {
        divisions: None,
        key: None,
        time: None,
        staves: None,
    };

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "divisions" => attrs.divisions = parse_i32(&child),
            "staves" => attrs.staves = parse_i32(&child),
            "key" => {
                let mut key = Key { fifths: 0, mode: None };
                for kc in child.children().filter(|n| n.is_element()) {
                    match kc.tag_name().name() {
                        "fifths" => key.fifths = parse_i32(&kc).unwrap_or(0),
                        "mode" => key.mode = kc.text().map(|t| t.trim().to_string()),
                        _ => {}
                    }
                }
                attrs.key = Some(key);
            }
            "time" => {
                let mut beats = 4;
                let mut beat_type = 4;
                for tc in child.children().filter(|n| n.is_element()) {
                    match tc.tag_name().name() {
                        "beats" => beats = parse_i32(&tc).unwrap_or(4),
                        "beat-type" => beat_type = parse_i32(&tc).unwrap_or(4),
                        _ => {}
                    }
                }
                attrs.time = Some(TimeSignature { beats, beat_type });
            }
            _ => {}
        }
    }

    attrs
}

// ─── Notes ───────────────────────────────────────────────────────────

fn parse_note(node: &Node) -> Note {
    let mut note = Note {
        pitch: None,
        duration: 0,
        voice: None,
        staff: None,
        rest: false,
        chord: false,
        grace: false,
        tie_start: false,
        tie_stop: false,
        articulations: Vec::new(),
    };

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "pitch" => {
                let mut pitch = Pitch { step: String::new(), octave: 4, alter: None };
                for pc in child.children().filter(|n| n.is_element()) {
                    match pc.tag_name().name() {
                        "step" => pitch.step = pc.text().unwrap_or("").trim().to_string(),
                        "octave" => pitch.octave = parse_i32(&pc).unwrap_or(4),
                        "alter" => pitch.alter = parse_f64(&pc),
                        _ => {}
                    }
                }
                note.pitch = Some(pitch);
            }
            "duration" => note.duration = parse_i32(&child).unwrap_or(0),
            "voice" => note.voice = parse_i32(&child),
            "staff" => note.staff = parse_i32(&child),
            "rest" => note.rest = true,
            "chord" => note.chord = true,
            "grace" => note.grace = true,
            "tie" => match child.attribute("type") {
                Some("start") => note.tie_start = true,
                Some("stop") => note.tie_stop = true,
                _ => {}
            },
            "notations" => parse_notations(&child, &mut note),
            _ => {}
        }
    }

    note
}

fn parse_notations(node: &Node, note: &mut Note) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() != "articulations" {
            continue;
        }
        for art in child.children().filter(|n| n.is_element()) {
            let parsed = match art.tag_name().name() {
                "staccato" => Some(Articulation::Staccato),
                "staccatissimo" => Some(Articulation::Staccatissimo),
                "tenuto" => Some(Articulation::Tenuto),
                "detached-legato" => Some(Articulation::DetachedLegato),
                "accent" => Some(Articulation::Accent),
                "strong-accent" => Some(Articulation::Marcato),
                _ => None,
            };
            if let Some(a) = parsed {
                if !note.articulations.contains(&a) {
                    note.articulations.push(a);
                }
            }
        }
    }
}

// ─── Directions ──────────────────────────────────────────────────────

fn parse_direction(node: &Node) -> Option<Direction> {
    let mut dir = Direction::default();
    let mut any = false;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "direction-type" => {
                for dt in child.children().filter(|n| n.is_element()) {
                    match dt.tag_name().name() {
                        "dynamics" => {
                            for dyn_el in dt.children().filter(|n| n.is_element()) {
                                if let Some(d) = Dynamic::from_name(dyn_el.tag_name().name()) {
                                    dir.dynamic = Some(d);
                                    any = true;
                                }
                            }
                        }
                        "metronome" => {
                            for mc in dt.children().filter(|n| n.is_element()) {
                                if mc.tag_name().name() == "per-minute" {
                                    dir.tempo_bpm = parse_f64(&mc);
                                    any = true;
                                }
                            }
                        }
                        "segno" => {
                            dir.segno = true;
                            any = true;
                        }
                        "coda" => {
                            dir.coda = true;
                            any = true;
                        }
                        "words" => {
                            let text = dt.text().unwrap_or("").trim().to_string();
                            if !text.is_empty() {
                                let lower = text.to_lowercase();
                                if lower.starts_with("pizz") {
                                    dir.technique = Some(Technique::Pizzicato);
                                } else if lower.starts_with("arco") {
                                    dir.technique = Some(Technique::Arco);
                                }
                                dir.words = Some(text);
                                any = true;
                            }
                        }
                        _ => {}
                    }
                }
            }
            "sound" => {
                if let Some(sound) = parse_sound(&child) {
                    merge_sound(&mut dir, sound);
                    any = true;
                }
            }
            _ => {}
        }
    }

    if any { Some(dir) } else { None }
}

/// Parse a `<sound>` element into a direction carrying only sound flags.
fn parse_sound(node: &Node) -> Option<Direction> {
    let mut dir = Direction::default();
    let mut any = false;

    if let Some(tempo) = node.attribute("tempo").and_then(|t| t.parse::<f64>().ok()) {
        dir.tempo_bpm = Some(tempo);
        any = true;
    }
    if let Some(d) = node.attribute("dynamics").and_then(|d| d.parse::<f64>().ok()) {
        // <sound dynamics> is a percentage of forte (90 ≈ mf)
        dir.dynamic = Some(dynamic_from_percentage(d));
        any = true;
    }
    if node.attribute("dalsegno").is_some() {
        dir.sound_dalsegno = true;
        any = true;
    }
    if node.attribute("dacapo") == Some("yes") {
        dir.sound_dacapo = true;
        any = true;
    }
    if node.attribute("fine").is_some() {
        dir.sound_fine = true;
        any = true;
    }
    if node.attribute("tocoda").is_some() {
        dir.sound_tocoda = true;
        any = true;
    }
    if node.attribute("segno").is_some() {
        dir.segno = true;
        any = true;
    }
    if node.attribute("coda").is_some() {
        dir.coda = true;
        any = true;
    }

    if any { Some(dir) } else { None }
}

fn merge_sound(dir: &mut Direction, sound: Direction) {
    if sound.tempo_bpm.is_some() {
        dir.tempo_bpm = sound.tempo_bpm;
    }
    if dir.dynamic.is_none() {
        dir.dynamic = sound.dynamic;
    }
    dir.segno |= sound.segno;
    dir.coda |= sound.coda;
    dir.sound_dalsegno |= sound.sound_dalsegno;
    dir.sound_dacapo |= sound.sound_dacapo;
    dir.sound_fine |= sound.sound_fine;
    dir.sound_tocoda |= sound.sound_tocoda;
}

/// Map a `<sound dynamics>` percentage-of-forte value to the nearest mark.
fn dynamic_from_percentage(pct: f64) -> Dynamic {
    match pct {
        p if p < 25.0 => Dynamic::Ppp,
        p if p < 40.0 => Dynamic::Pp,
        p if p < 55.0 => Dynamic::P,
        p if p < 70.0 => Dynamic::Mp,
        p if p < 90.0 => Dynamic::Mf,
        p if p < 110.0 => Dynamic::F,
        p if p < 125.0 => Dynamic::Ff,
        _ => Dynamic::Fff,
    }
}

// ─── Barlines ────────────────────────────────────────────────────────

fn parse_barline(node: &Node) -> Barline {
    let location = match node.attribute("location") {
        Some("left") => BarlineLocation::Left,
        _ => BarlineLocation::Right,
    };

    let mut barline = Barline { location, repeat: None, ending: None };

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "repeat" => {
                let direction = match child.attribute("direction") {
                    Some("forward") => RepeatDirection::Forward,
                    _ => RepeatDirection::Backward,
                };
                barline.repeat = Some(Repeat { direction });
            }
            "ending" => {
                let ending_type = match child.attribute("type") {
                    Some("start") => EndingType::Start,
                    Some("discontinue") => EndingType::Discontinue,
                    _ => EndingType::Stop,
                };
                barline.ending = Some(Ending {
                    number: child.attribute("number").unwrap_or("1").to_string(),
                    ending_type,
                });
            }
            _ => {}
        }
    }

    barline
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn parse_i32(node: &Node) -> Option<i32> {
    node.text().and_then(|t| t.trim().parse::<i32>().ok())
}

fn parse_f64(node: &Node) -> Option<f64> {
    node.text().and_then(|t| t.trim().parse::<f64>().ok())
}
