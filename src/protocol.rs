//! Russound ASCII line protocol
//!
//! Outbound commands are single lines of the form `!<zone>,<value>,<cmd>\r`.
//! The gateway reports state with lines of the same shape, led by `!` or `#`.
//! Everything here is pure: encoding never touches a socket and decoding holds
//! no state between calls (except [`LineBuffer`], which exists for exactly that).

use crate::types::{ZoneField, ZoneId, ZoneUpdate, ZoneValue, MAX_ZONE};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[!#]\s*(\d+)\s*,\s*(-?\d+)\s*,\s*(\d+)\s*$").expect("line pattern is valid")
});

/// Longest unterminated tail [`LineBuffer`] keeps before treating it as noise
const MAX_PENDING_LINE: usize = 1024;

/// Semantic command classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandKind {
    Power,
    Mute,
    Source,
    Volume,
    AllOff,
    Bass,
    Treble,
    Balance,
    Loudness,
    ZoneQuery,
}

impl CommandKind {
    /// Zone attribute an inbound line with this command updates, if any
    fn field(&self) -> Option<ZoneField> {
        match self {
            CommandKind::Power => Some(ZoneField::OnOff),
            CommandKind::Mute => Some(ZoneField::Mute),
            CommandKind::Source => Some(ZoneField::Source),
            CommandKind::Volume => Some(ZoneField::Volume),
            CommandKind::Bass => Some(ZoneField::Bass),
            CommandKind::Treble => Some(ZoneField::Treble),
            CommandKind::Balance => Some(ZoneField::Balance),
            CommandKind::Loudness => Some(ZoneField::Loudness),
            CommandKind::AllOff | CommandKind::ZoneQuery => None,
        }
    }
}

/// Whether a command kind may be sent to the current hardware revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Verified, with the numeric id used on the wire
    Supported { wire_id: u32 },
    /// Not verified against this hardware; encoding yields a no-op
    Unsupported,
}

/// Valid values for a command kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// 1 = on, 0 = off
    Flag,
    /// Inclusive integer range
    Range { min: i64, max: i64 },
    /// Value is fixed by the command itself
    Fixed,
}

impl Domain {
    fn clamp(&self, raw: f64) -> i64 {
        match *self {
            Domain::Flag => i64::from(clamp_int(raw, 0, 1) != 0),
            Domain::Range { min, max } => clamp_int(raw, min, max),
            Domain::Fixed => 0,
        }
    }
}

/// Table entry describing one command kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub capability: Capability,
    pub domain: Domain,
    /// Whether the capability may be switched on at runtime
    pub enableable: bool,
}

/// A fully encoded wire command
///
/// The empty command is the "do not transmit" sentinel produced for
/// unsupported kinds. Only [`Codec`] builds commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    /// The no-op sentinel
    pub(crate) fn noop() -> Self {
        Self(String::new())
    }

    /// True for the no-op sentinel (or any whitespace-only command)
    pub fn is_noop(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// The command as text, including the trailing `\r`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The command as bytes ready for the socket
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.trim_end())
    }
}

/// One decoded inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub zone: ZoneId,
    pub value: i64,
    pub cmd: u32,
    /// The trimmed source line
    pub raw: String,
}

/// Encoder/decoder driven by a command table
///
/// Verifying a tone command on real hardware is a matter of calling
/// [`Codec::enable`] with its wire id; both encoding and event mapping pick it up.
#[derive(Debug, Clone)]
pub struct Codec {
    table: HashMap<CommandKind, CommandSpec>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// Codec with the commands known to work on CAx6.6 hardware
    pub fn new() -> Self {
        use CommandKind::*;

        let tone = Domain::Range { min: -10, max: 10 };
        let entries = [
            (Power, supported(1, Domain::Flag)),
            (Mute, supported(2, Domain::Flag)),
            (Source, supported(4, Domain::Range { min: 1, max: 6 })),
            (Volume, supported(5, Domain::Range { min: 0, max: 100 })),
            (AllOff, fixed(Domain::Fixed)),
            (Bass, unverified(tone)),
            (Treble, unverified(tone)),
            (Balance, unverified(tone)),
            (Loudness, unverified(Domain::Flag)),
            (ZoneQuery, fixed(Domain::Fixed)),
        ];

        Self {
            table: entries.into_iter().collect(),
        }
    }

    /// Mark an unverified command kind as supported under `wire_id`
    ///
    /// Returns `false` (and changes nothing) for kinds that cannot be enabled
    /// and for a `wire_id` already used by another kind.
    pub fn enable(&mut self, kind: CommandKind, wire_id: u32) -> bool {
        let taken = self.table.iter().any(|(other, spec)| {
            *other != kind && spec.capability == Capability::Supported { wire_id }
        });
        if taken {
            return false;
        }

        match self.table.get_mut(&kind) {
            Some(spec) if spec.enableable => {
                spec.capability = Capability::Supported { wire_id };
                true
            }
            _ => false,
        }
    }

    /// Builder form of [`Codec::enable`]
    pub fn with_enabled(mut self, kind: CommandKind, wire_id: u32) -> Self {
        if !self.enable(kind, wire_id) {
            tracing::warn!("Command kind {:?} cannot be enabled as wire id {}", kind, wire_id);
        }
        self
    }

    /// Table entry for a command kind
    pub fn spec(&self, kind: CommandKind) -> Option<&CommandSpec> {
        self.table.get(&kind)
    }

    /// Whether `kind` can be transmitted
    pub fn capability(&self, kind: CommandKind) -> Capability {
        match kind {
            CommandKind::AllOff => self.capability(CommandKind::Power),
            _ => self
                .table
                .get(&kind)
                .map(|spec| spec.capability)
                .unwrap_or(Capability::Unsupported),
        }
    }

    /// Encode a command, clamping `raw` into the kind's domain
    ///
    /// Unsupported kinds yield the no-op sentinel.
    pub fn encode(&self, kind: CommandKind, zone: ZoneId, raw: f64) -> Command {
        if kind == CommandKind::AllOff {
            return self.encode(CommandKind::Power, 0, 0.0);
        }

        let Some(spec) = self.table.get(&kind) else {
            return Command::noop();
        };
        match spec.capability {
            Capability::Supported { wire_id } => build(zone, spec.domain.clamp(raw), wire_id),
            Capability::Unsupported => Command::noop(),
        }
    }

    /// Zone on/off
    pub fn power(&self, zone: ZoneId, on: bool) -> Command {
        self.encode(CommandKind::Power, zone, flag(on))
    }

    /// Zone mute on/off
    pub fn mute(&self, zone: ZoneId, on: bool) -> Command {
        self.encode(CommandKind::Mute, zone, flag(on))
    }

    /// Source selection, clamped to 1..=6
    pub fn source(&self, zone: ZoneId, source: f64) -> Command {
        self.encode(CommandKind::Source, zone, source)
    }

    /// Volume, clamped to 0..=100
    pub fn volume(&self, zone: ZoneId, volume: f64) -> Command {
        self.encode(CommandKind::Volume, zone, volume)
    }

    /// Power off every zone (zone 0)
    pub fn all_off(&self) -> Command {
        self.encode(CommandKind::AllOff, 0, 0.0)
    }

    /// Bass, clamped to -10..=10
    pub fn bass(&self, zone: ZoneId, bass: f64) -> Command {
        self.encode(CommandKind::Bass, zone, bass)
    }

    /// Treble, clamped to -10..=10
    pub fn treble(&self, zone: ZoneId, treble: f64) -> Command {
        self.encode(CommandKind::Treble, zone, treble)
    }

    /// Balance, clamped to -10..=10
    pub fn balance(&self, zone: ZoneId, balance: f64) -> Command {
        self.encode(CommandKind::Balance, zone, balance)
    }

    /// Loudness on/off
    pub fn loudness(&self, zone: ZoneId, on: bool) -> Command {
        self.encode(CommandKind::Loudness, zone, flag(on))
    }

    /// Zone status request; no verified form exists yet
    pub fn query_zone(&self, zone: ZoneId) -> Command {
        self.encode(CommandKind::ZoneQuery, zone, 0.0)
    }

    /// Translate a decoded line into a zone attribute update
    ///
    /// Only zones 1..=6 and supported command ids produce an update.
    pub fn map_event(&self, event: &InboundEvent) -> Option<ZoneUpdate> {
        if event.zone < 1 || event.zone > MAX_ZONE {
            return None;
        }

        let kind = self.kind_for_wire_id(event.cmd)?;
        let field = kind.field()?;
        let value = match kind {
            CommandKind::Power | CommandKind::Mute | CommandKind::Loudness => {
                ZoneValue::Bool(event.value == 1)
            }
            CommandKind::Source => ZoneValue::Text(event.value.clamp(1, 6).to_string()),
            CommandKind::Volume => ZoneValue::Level(event.value.clamp(0, 100) as f64 / 100.0),
            CommandKind::Bass | CommandKind::Treble | CommandKind::Balance => {
                ZoneValue::Int(event.value.clamp(-10, 10))
            }
            CommandKind::AllOff | CommandKind::ZoneQuery => return None,
        };

        Some(ZoneUpdate {
            zone: event.zone,
            field,
            value,
        })
    }

    fn kind_for_wire_id(&self, cmd: u32) -> Option<CommandKind> {
        self.table
            .iter()
            .filter(|(kind, _)| kind.field().is_some())
            .find(|(_, spec)| spec.capability == Capability::Supported { wire_id: cmd })
            .map(|(kind, _)| *kind)
    }
}

/// Parse a single line, returning `None` for anything that is not a status line
pub fn decode_line(line: &str) -> Option<InboundEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let caps = LINE_RE.captures(trimmed)?;
    let zone: ZoneId = caps[1].parse().ok()?;
    let value: i64 = caps[2].parse().ok()?;
    let cmd: u32 = caps[3].parse().ok()?;

    if zone > MAX_ZONE {
        return None;
    }

    Some(InboundEvent {
        zone,
        value,
        cmd,
        raw: trimmed.to_string(),
    })
}

/// Decode every complete status line in a chunk
///
/// Lines may be separated by `\r`, `\n` or `\r\n`; unmatched lines are skipped.
pub fn decode_chunk(bytes: &[u8]) -> Vec<InboundEvent> {
    String::from_utf8_lossy(bytes)
        .split(['\r', '\n'])
        .filter_map(decode_line)
        .collect()
}

/// Reassembles lines that arrive split across socket reads
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and decode every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<InboundEvent> {
        self.pending.extend_from_slice(chunk);

        let Some(end) = self.pending.iter().rposition(|&b| b == b'\r' || b == b'\n') else {
            if self.pending.len() > MAX_PENDING_LINE {
                tracing::debug!("Discarding {} bytes of unterminated input", self.pending.len());
                self.pending.clear();
            }
            return Vec::new();
        };

        let complete: Vec<u8> = self.pending.drain(..=end).collect();
        decode_chunk(&complete)
    }

    /// Bytes held back waiting for a line terminator
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial line, e.g. when the socket is replaced
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

fn supported(wire_id: u32, domain: Domain) -> CommandSpec {
    CommandSpec {
        capability: Capability::Supported { wire_id },
        domain,
        enableable: false,
    }
}

fn unverified(domain: Domain) -> CommandSpec {
    CommandSpec {
        capability: Capability::Unsupported,
        domain,
        enableable: true,
    }
}

fn fixed(domain: Domain) -> CommandSpec {
    CommandSpec {
        capability: Capability::Unsupported,
        domain,
        enableable: false,
    }
}

fn flag(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

fn build(zone: ZoneId, value: i64, wire_id: u32) -> Command {
    Command(format!("!{},{},{}\r", zone, value, wire_id))
}

/// Round half away from zero, then clamp; NaN maps to `min`
fn clamp_int(raw: f64, min: i64, max: i64) -> i64 {
    if raw.is_nan() {
        return min;
    }
    raw.round().clamp(min as f64, max as f64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(command: &Command) -> InboundEvent {
        let events = decode_chunk(command.as_bytes());
        assert_eq!(events.len(), 1, "expected one event for {:?}", command);
        events.into_iter().next().unwrap()
    }

    #[test]
    fn encodes_wire_format() {
        let codec = Codec::new();
        assert_eq!(codec.power(3, true).as_str(), "!3,1,1\r");
        assert_eq!(codec.mute(2, false).as_str(), "!2,0,2\r");
        assert_eq!(codec.source(1, 4.0).as_str(), "!1,4,4\r");
        assert_eq!(codec.volume(6, 42.0).as_str(), "!6,42,5\r");
        assert_eq!(codec.all_off().as_str(), "!0,0,1\r");
    }

    #[test]
    fn volume_round_trip_is_rounded_and_clamped() {
        let codec = Codec::new();
        let cases = [
            (-20.0, 0),
            (0.0, 0),
            (0.5, 1),
            (49.4, 49),
            (49.5, 50),
            (100.0, 100),
            (100.4, 100),
            (250.0, 100),
            (f64::INFINITY, 100),
            (f64::NAN, 0),
        ];
        for (input, expected) in cases {
            let event = round_trip(&codec.volume(4, input));
            assert_eq!(event.value, expected, "volume input {}", input);
            assert_eq!(event.cmd, 5);
            assert_eq!(event.zone, 4);
        }
    }

    #[test]
    fn source_round_trip_is_rounded_and_clamped() {
        let codec = Codec::new();
        for (input, expected) in [(-3.0, 1), (0.49, 1), (2.5, 3), (5.6, 6), (9.0, 6)] {
            assert_eq!(round_trip(&codec.source(1, input)).value, expected, "source {}", input);
        }
    }

    #[test]
    fn flags_encode_as_zero_or_one() {
        let codec = Codec::new();
        assert_eq!(codec.encode(CommandKind::Power, 1, 7.0).as_str(), "!1,1,1\r");
        assert_eq!(codec.encode(CommandKind::Mute, 1, 0.2).as_str(), "!1,0,2\r");
        assert_eq!(codec.encode(CommandKind::Power, 1, f64::NAN).as_str(), "!1,0,1\r");
    }

    #[test]
    fn unverified_kinds_are_noops() {
        let codec = Codec::new();
        assert!(codec.bass(2, 5.0).is_noop());
        assert!(codec.treble(2, -3.0).is_noop());
        assert!(codec.balance(2, 0.0).is_noop());
        assert!(codec.loudness(2, true).is_noop());
        assert!(codec.query_zone(2).is_noop());
        assert_eq!(codec.capability(CommandKind::Bass), Capability::Unsupported);
        assert_eq!(
            codec.capability(CommandKind::Volume),
            Capability::Supported { wire_id: 5 }
        );
    }

    #[test]
    fn enabling_a_tone_command() {
        let mut codec = Codec::new();
        assert!(codec.enable(CommandKind::Bass, 20));
        assert_eq!(codec.bass(2, 14.0).as_str(), "!2,10,20\r");
        assert_eq!(codec.bass(2, -4.5).as_str(), "!2,-5,20\r");

        let update = codec.map_event(&decode_line("!2,-12,20").unwrap()).unwrap();
        assert_eq!(update.field, ZoneField::Bass);
        assert_eq!(update.value, ZoneValue::Int(-10));
    }

    #[test]
    fn enabling_with_a_taken_wire_id_is_refused() {
        for _ in 0..20 {
            let mut codec = Codec::new();
            assert!(!codec.enable(CommandKind::Bass, 5));
            assert_eq!(codec.capability(CommandKind::Bass), Capability::Unsupported);
            assert!(codec.bass(2, 3.0).is_noop());

            let update = codec.map_event(&decode_line("!2,50,5").unwrap()).unwrap();
            assert_eq!(update.field, ZoneField::Volume);
            assert_eq!(update.value, ZoneValue::Level(0.5));
        }

        let mut codec = Codec::new();
        assert!(codec.enable(CommandKind::Treble, 21));
        assert!(!codec.enable(CommandKind::Bass, 21));
        // Re-enabling a kind under its own id is fine
        assert!(codec.enable(CommandKind::Treble, 21));
    }

    #[test]
    fn query_and_fixed_kinds_cannot_be_enabled() {
        let mut codec = Codec::new();
        assert!(!codec.enable(CommandKind::ZoneQuery, 30));
        assert!(!codec.enable(CommandKind::AllOff, 31));
        assert!(!codec.enable(CommandKind::Power, 32));
        assert!(codec.query_zone(1).is_noop());
        assert_eq!(codec.power(1, true).as_str(), "!1,1,1\r");
    }

    #[test]
    fn decode_ignores_empty_and_garbage() {
        assert!(decode_chunk(b"").is_empty());
        assert!(decode_chunk(b"   \r\n \t ").is_empty());
        assert!(decode_chunk(b"hello\r?3,1,1\r!3,1\r!a,b,c\n").is_empty());
        assert!(decode_chunk(&[0xff, 0xfe, b'\r']).is_empty());
    }

    #[test]
    fn decode_two_lines_in_order() {
        let events = decode_chunk(b"!3,1,1\r!4,0,1\r");
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].zone, events[0].value, events[0].cmd), (3, 1, 1));
        assert_eq!((events[1].zone, events[1].value, events[1].cmd), (4, 0, 1));
        assert_eq!(events[0].raw, "!3,1,1");
    }

    #[test]
    fn decode_accepts_hash_sigil_whitespace_and_mixed_endings() {
        let events = decode_chunk(b"# 2 , -3 , 5 \r\n!1,1,2\nnoise\r!6,40,5");
        let summary: Vec<_> = events.iter().map(|e| (e.zone, e.value, e.cmd)).collect();
        assert_eq!(summary, vec![(2, -3, 5), (1, 1, 2), (6, 40, 5)]);
    }

    #[test]
    fn decode_drops_out_of_range_zones() {
        assert!(decode_line("!7,1,1").is_none());
        assert!(decode_line("!300,1,1").is_none());
        assert!(decode_line("!0,0,1").is_some());
    }

    #[test]
    fn map_event_fields() {
        let codec = Codec::new();
        let map = |line: &str| codec.map_event(&decode_line(line).unwrap());

        let power = map("!3,1,1").unwrap();
        assert_eq!((power.zone, power.field, power.value), (3, ZoneField::OnOff, ZoneValue::Bool(true)));
        assert_eq!(map("!3,2,2").unwrap().value, ZoneValue::Bool(false));
        assert_eq!(map("!3,9,4").unwrap().value, ZoneValue::Text("6".into()));
        assert_eq!(map("!3,55,5").unwrap().value, ZoneValue::Level(0.55));
        assert_eq!(map("!3,140,5").unwrap().value, ZoneValue::Level(1.0));
    }

    #[test]
    fn map_event_skips_system_zone_and_unknown_ids() {
        let codec = Codec::new();
        assert!(codec.map_event(&decode_line("!0,0,1").unwrap()).is_none());
        assert!(codec.map_event(&decode_line("!2,1,99").unwrap()).is_none());
        assert!(codec.map_event(&decode_line("!2,1,3").unwrap()).is_none());
    }

    #[test]
    fn line_buffer_joins_split_lines() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"!3,1").is_empty());
        assert_eq!(buffer.pending(), 4);

        let events = buffer.push(b",1\r!4,0,");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw, "!3,1,1");

        let events = buffer.push(b"1\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].zone, 4);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn line_buffer_discards_runaway_input() {
        let mut buffer = LineBuffer::new();
        buffer.push(&[b'x'; MAX_PENDING_LINE + 1]);
        assert_eq!(buffer.pending(), 0);
        assert_eq!(buffer.push(b"!1,1,1\r").len(), 1);
    }
}
