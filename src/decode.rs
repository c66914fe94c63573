//! Textual frame decoder.
//!
//! Interprets opcodes and their typed operand sequences for logging. The
//! grammar comes from the HDMI 1.3a standard, supplement 1 (CEC); vendor ID
//! names follow the v4l-utils list, and the digital audio descriptors the
//! EDID short-audio-descriptor layout.
//!
//! Pure and side-effect free; independent of the I/O core.

use core::fmt::Write;

use heapless::String;

use crate::frame::CecFrame;

/// Capacity of the decoded line.
const LINE_CAPACITY: usize = 256;

/// Operand types used across the opcode set. Only the tags that appear in
/// the opcode table exist here; tags without a dedicated routine decode as
/// a placeholder byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Operand {
    AbortReason,
    AnalogBroadcastType,
    AnalogFrequency,
    AudioFormat,
    AudioRate,
    AudioStatus,
    BroadcastSystem,
    CecVersion,
    DeckControlMode,
    DeckInfo,
    DeviceType,
    DigitalServiceIdentification,
    DisplayControl,
    Duration,
    FeatureOpcode,
    Language,
    MenuRequestType,
    MenuState,
    OsdName,
    OsdString,
    PhysicalAddress,
    PlayMode,
    PowerStatus,
    ProgramTitleString,
    RecordSource,
    RecordStatusInfo,
    ShortAudioDescriptor,
    StartDateTime,
    StatusRequest,
    SystemAudioStatus,
    TimerClearedStatusData,
    TimerStatusData,
    TunerDeviceInfo,
    UiCommand,
    VendorId,
    VendorSpecificData,
    VendorSpecificRcCode,
}

struct OpcodeEntry {
    opcode: u8,
    name: &'static str,
    operands: &'static [Operand],
}

use Operand::*;

static OPCODE_TABLE: &[OpcodeEntry] = &[
    OpcodeEntry { opcode: 0x00, name: "Feature Abort", operands: &[FeatureOpcode, AbortReason] },
    OpcodeEntry { opcode: 0x04, name: "Image View On", operands: &[] },
    OpcodeEntry { opcode: 0x05, name: "Tuner Step Increment", operands: &[] },
    OpcodeEntry { opcode: 0x06, name: "Tuner Step Decrement", operands: &[] },
    OpcodeEntry { opcode: 0x07, name: "Tuner Device Status", operands: &[TunerDeviceInfo] },
    OpcodeEntry { opcode: 0x08, name: "Give Tuner Device Status", operands: &[StatusRequest] },
    OpcodeEntry { opcode: 0x09, name: "Record On", operands: &[RecordSource] },
    OpcodeEntry { opcode: 0x0A, name: "Record Status", operands: &[RecordStatusInfo] },
    OpcodeEntry { opcode: 0x0B, name: "Record Off", operands: &[] },
    OpcodeEntry { opcode: 0x0D, name: "Text View On", operands: &[] },
    OpcodeEntry { opcode: 0x0F, name: "Record TV Screen", operands: &[] },
    OpcodeEntry { opcode: 0x1A, name: "Give Deck Status", operands: &[StatusRequest] },
    OpcodeEntry { opcode: 0x1B, name: "Deck Status", operands: &[DeckInfo] },
    OpcodeEntry { opcode: 0x32, name: "Set Menu Language", operands: &[Language] },
    OpcodeEntry { opcode: 0x33, name: "Clear Analogue Timer", operands: &[StartDateTime, Duration] },
    OpcodeEntry { opcode: 0x34, name: "Set Analogue Timer", operands: &[StartDateTime, Duration] },
    OpcodeEntry { opcode: 0x35, name: "Timer Status", operands: &[TimerStatusData] },
    OpcodeEntry { opcode: 0x36, name: "Standby", operands: &[] },
    OpcodeEntry { opcode: 0x41, name: "Play", operands: &[PlayMode] },
    OpcodeEntry { opcode: 0x42, name: "Deck Control", operands: &[DeckControlMode] },
    OpcodeEntry { opcode: 0x43, name: "Timer Cleared Status", operands: &[TimerClearedStatusData] },
    OpcodeEntry { opcode: 0x44, name: "User Control Pressed", operands: &[UiCommand] },
    OpcodeEntry { opcode: 0x45, name: "User Control Released", operands: &[] },
    OpcodeEntry { opcode: 0x46, name: "Give OSD Name", operands: &[] },
    OpcodeEntry { opcode: 0x47, name: "Set OSD Name", operands: &[OsdName] },
    OpcodeEntry { opcode: 0x64, name: "Set OSD String", operands: &[DisplayControl, OsdString] },
    OpcodeEntry { opcode: 0x67, name: "Set Timer Program Title", operands: &[ProgramTitleString] },
    OpcodeEntry { opcode: 0x70, name: "System Audio Mode Request", operands: &[PhysicalAddress] },
    OpcodeEntry { opcode: 0x71, name: "Give Audio Status", operands: &[] },
    OpcodeEntry { opcode: 0x72, name: "Set System Audio Mode", operands: &[SystemAudioStatus] },
    OpcodeEntry { opcode: 0x7A, name: "Report Audio Status", operands: &[AudioStatus] },
    OpcodeEntry { opcode: 0x7D, name: "Give System Audio Mode Status", operands: &[] },
    OpcodeEntry { opcode: 0x7E, name: "System Audio Mode Status", operands: &[SystemAudioStatus] },
    OpcodeEntry { opcode: 0x80, name: "Routing Change", operands: &[PhysicalAddress, PhysicalAddress] },
    OpcodeEntry { opcode: 0x81, name: "Routing Information", operands: &[PhysicalAddress] },
    OpcodeEntry { opcode: 0x82, name: "Active Source", operands: &[PhysicalAddress] },
    OpcodeEntry { opcode: 0x83, name: "Give Physical Address", operands: &[] },
    OpcodeEntry { opcode: 0x84, name: "Report Physical Address", operands: &[PhysicalAddress, DeviceType] },
    OpcodeEntry { opcode: 0x85, name: "Request Active Source", operands: &[] },
    OpcodeEntry { opcode: 0x86, name: "Set Stream Path", operands: &[PhysicalAddress] },
    OpcodeEntry { opcode: 0x87, name: "Device Vendor ID", operands: &[VendorId] },
    OpcodeEntry { opcode: 0x89, name: "Vendor Command", operands: &[VendorSpecificData] },
    OpcodeEntry { opcode: 0x8A, name: "Vendor Remote Button Down", operands: &[VendorSpecificRcCode] },
    OpcodeEntry { opcode: 0x8B, name: "Vendor Remote Button Up", operands: &[] },
    OpcodeEntry { opcode: 0x8C, name: "Give Device Vendor ID", operands: &[] },
    OpcodeEntry { opcode: 0x8D, name: "Menu Request", operands: &[MenuRequestType] },
    OpcodeEntry { opcode: 0x8E, name: "Menu Status", operands: &[MenuState] },
    OpcodeEntry { opcode: 0x8F, name: "Give Device Power Status", operands: &[] },
    OpcodeEntry { opcode: 0x90, name: "Report Power Status", operands: &[PowerStatus] },
    OpcodeEntry { opcode: 0x91, name: "Get Menu Language", operands: &[] },
    OpcodeEntry { opcode: 0x92, name: "Select Analogue Service", operands: &[AnalogBroadcastType, AnalogFrequency, BroadcastSystem] },
    OpcodeEntry { opcode: 0x93, name: "Select Digital Service", operands: &[DigitalServiceIdentification] },
    OpcodeEntry { opcode: 0x97, name: "Set Digital Timer", operands: &[StartDateTime, Duration] },
    OpcodeEntry { opcode: 0x99, name: "Clear Digital Timer", operands: &[StartDateTime, Duration] },
    OpcodeEntry { opcode: 0x9A, name: "Set Audio Rate", operands: &[AudioRate] },
    OpcodeEntry { opcode: 0x9D, name: "Inactive Source", operands: &[PhysicalAddress] },
    OpcodeEntry { opcode: 0x9E, name: "CEC Version", operands: &[CecVersion] },
    OpcodeEntry { opcode: 0x9F, name: "Get CEC Version", operands: &[] },
    OpcodeEntry { opcode: 0xA0, name: "Vendor Command With ID", operands: &[VendorId, VendorSpecificData] },
    OpcodeEntry { opcode: 0xA1, name: "Clear External Timer", operands: &[StartDateTime, Duration] },
    OpcodeEntry { opcode: 0xA2, name: "Set External Timer", operands: &[StartDateTime, Duration] },
    OpcodeEntry { opcode: 0xA3, name: "Report Short Audio Descriptor", operands: &[ShortAudioDescriptor] },
    OpcodeEntry { opcode: 0xA4, name: "Request Short Audio Descriptor", operands: &[AudioFormat] },
    OpcodeEntry { opcode: 0xC0, name: "Initiate ARC", operands: &[] },
    OpcodeEntry { opcode: 0xC1, name: "Report ARC Initiated", operands: &[] },
    OpcodeEntry { opcode: 0xC2, name: "Report ARC Terminated", operands: &[] },
    OpcodeEntry { opcode: 0xC3, name: "Request ARC Initiation", operands: &[] },
    OpcodeEntry { opcode: 0xC4, name: "Request ARC Termination", operands: &[] },
    OpcodeEntry { opcode: 0xC5, name: "Terminate ARC", operands: &[] },
    OpcodeEntry { opcode: 0xF8, name: "CDC Message", operands: &[] },
    OpcodeEntry { opcode: 0xFF, name: "Abort", operands: &[] },
];

static ADDRESS_NAMES: [&str; 16] = [
    "TV",
    "RecordingDev1",
    "RecordingDev2",
    "Tuner1",
    "PlaybackDev1",
    "AudioSystem",
    "Tuner2",
    "Tuner3",
    "PlaybackDev2",
    "RecordingDev3",
    "Tuner4",
    "PlaybackDev3",
    "Reserved",
    "Reserved",
    "SpecificUse",
    "Unregistered",
];

static ABORT_REASONS: [&str; 6] = [
    "Unrecognized opcode",
    "Not in correct mode to respond",
    "Cannot provide source",
    "Invalid operand",
    "Refused",
    "Unable to determine",
];

static CEC_VERSIONS: [&str; 9] = ["?", "1.2", "1.2a", "1.3", "1.3a", "1.4", "2.0", "2.x", "2.x"];

static POWER_STATUSES: [&str; 4] = ["On", "Standby", "Standby->On", "On->Standby"];

static DEVICE_TYPES: [&str; 8] = [
    "TV",
    "Recording Device",
    "Reserved",
    "Tuner",
    "Playback Device",
    "Audio System",
    "Pure CEC Switch",
    "Video Processor",
];

static DISPLAY_CONTROLS: [&str; 4] = ["Default Time", "Until cleared", "Clear previous", "Reserved"];

static SYSTEM_AUDIO_STATUSES: [&str; 2] = ["Off", "On"];

// See "short audio descriptor" under Extended Display Identification Data.
static AUDIO_FORMATS: [&str; 16] = [
    "reserved", "LPCM", "AC3", "MPEG-1", "MP3", "MPEG-2", "AAC", "DTS", "ATRAC", "DSD", "DD+",
    "DTS-HD", "MAT/Dolby TrueHD", "DST Audio", "WMA Pro", "Extension?",
];

static AUDIO_SAMPLE_RATES: [&str; 8] = ["32", "44.1", "48", "88", "96", "176", "192", "Reserved"];

static UI_COMMANDS: [&str; 0x77] = [
    /* 0x00 = */ "Select",
    "Up",
    "Down",
    "Left",
    "Right",
    "Right-Up",
    "Right-Down",
    "Left-Up",
    /* 0x08 = */ "Left-Down",
    "Root Menu",
    "Setup Menu",
    "Contents Menu",
    "Favorite Menu",
    "Exit",
    "Reserved",
    "Reserved",
    /* 0x10 = */ "Media Top Menu",
    "Media Context-sensitive Menu",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    /* 0x18 = */ "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Number Entry Mode",
    "11",
    "12",
    /* 0x20 = */ "0",
    "1",
    "2",
    "3",
    "4",
    "5",
    "6",
    "7",
    /* 0x28 = */ "8",
    "9",
    "Dot",
    "Enter",
    "Clear",
    "Reserved",
    "Reserved",
    "Next Favorite",
    /* 0x30 = */ "Channel Up",
    "Channel Down",
    "Previous Channel",
    "Sound Select",
    "Input Select",
    "Display Information",
    "Help",
    "Page Up",
    /* 0x38 = */ "Page Down",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    /* 0x40 = */ "Power",
    "Volume Up",
    "Volume Down",
    "Mute",
    "Play",
    "Stop",
    "Pause",
    "Record",
    /* 0x48 = */ "Rewind",
    "Fast forward",
    "Eject",
    "Forward",
    "Backward",
    "Stop-Record",
    "Pause-Record",
    "Reserved",
    /* 0x50 = */ "Angle",
    "Sub picture",
    "Video on Demand",
    "Electronic Program Guide",
    "Timer Programming",
    "Initial Configuration",
    "Select Broadcast Type",
    "Select Sound Presentation",
    /* 0x58 = */ "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    /* 0x60 = */ "Play Function",
    "Pause-Play Function",
    "Record Function",
    "Pause-Record Function",
    "Stop Function",
    "Mute Function",
    "Restore Volume Function",
    "Tune Function",
    /* 0x68 = */ "Select Media Function",
    "Select A/V Input Function",
    "Select Audio Input Function",
    "Power Toggle Function",
    "Power Off Function",
    "Power On Function",
    "Reserved",
    "Reserved",
    /* 0x70 = */ "Reserved",
    "F1 (Blue)",
    "F2 (Red)",
    "F3 (Green)",
    "F4 (Yellow)",
    "F5",
    "Data",
];

static VENDOR_IDS: [(u32, &str); 28] = [
    (0x000039, "Toshiba"),
    (0x0000F0, "Samsung"),
    (0x0005CD, "Denon"),
    (0x000678, "Maranz"),
    (0x000982, "Loewe"),
    (0x0009B0, "Onkyo"),
    (0x000CB8, "Medion"),
    (0x000CE7, "Toshiba"),
    (0x0010FA, "Apple"),
    (0x001582, "Pulse Eight"),
    (0x001950, "Harman Kardon"),
    (0x001A11, "Google"),
    (0x0020C7, "Akai"),
    (0x002467, "AOC"),
    (0x008045, "Panasonic"),
    (0x00903E, "Philips"),
    (0x009053, "Daewoo"),
    (0x00A0DE, "Yamaha"),
    (0x00D0D5, "Grundig"),
    (0x00E036, "Pioneer"),
    (0x00E091, "LG"),
    (0x08001F, "Sharp"),
    (0x080046, "Sony"),
    (0x18C086, "Broadcom"),
    (0x534850, "Sharp"),
    (0x6B746D, "Vizio"),
    (0x8065E9, "Benq"),
    (0x9C645E, "Harman Kardon"),
];

fn opcode_entry(opcode: u8) -> Option<&'static OpcodeEntry> {
    OPCODE_TABLE.iter().find(|entry| entry.opcode == opcode)
}

fn opcode_name(opcode: u8) -> &'static str {
    opcode_entry(opcode).map_or("?", |entry| entry.name)
}

type Text = String<LINE_CAPACITY>;

/// Render a frame as `SRC to DST: <OpName>[op1][op2]...`, or `Ping` for a
/// header-only frame, or `<?>` for an unknown opcode.
pub fn decode(frame: &CecFrame) -> String<LINE_CAPACITY> {
    let mut out = Text::new();
    let destination = if frame.is_broadcast() {
        "All"
    } else {
        ADDRESS_NAMES[frame.destination().0 as usize]
    };
    let _ = write!(
        out,
        "{} to {}: ",
        ADDRESS_NAMES[frame.initiator().0 as usize],
        destination
    );

    let bytes = frame.as_bytes();
    if bytes.len() <= 1 {
        let _ = out.push_str("Ping");
        return out;
    }

    match opcode_entry(bytes[1]) {
        None => {
            let _ = out.push_str("<?>");
        }
        Some(entry) => {
            let _ = write!(out, "<{}>", entry.name);
            let mut offset = 2usize;
            for &operand in entry.operands {
                if !decode_operand(&mut out, bytes, &mut offset, operand) {
                    break;
                }
            }
        }
    }
    out
}

fn push_bracketed(out: &mut Text, text: &str) {
    let _ = write!(out, "[{}]", text);
}

/// One enumerated single-byte operand; out-of-range values print as `?`.
fn enumerated(out: &mut Text, frame: &[u8], offset: &mut usize, names: &[&str]) -> bool {
    let Some(&value) = frame.get(*offset) else {
        return false;
    };
    push_bracketed(out, names.get(value as usize).copied().unwrap_or("?"));
    *offset += 1;
    *offset < frame.len()
}

/// A single operand byte without a dedicated decode routine.
fn placeholder(out: &mut Text, frame: &[u8], offset: &mut usize) -> bool {
    if *offset >= frame.len() {
        return false;
    }
    push_bracketed(out, ".");
    *offset += 1;
    *offset < frame.len()
}

/// Decode one operand, appending `[text]`. Returns whether further
/// operands can follow.
fn decode_operand(out: &mut Text, frame: &[u8], offset: &mut usize, operand: Operand) -> bool {
    match operand {
        Operand::AbortReason => enumerated(out, frame, offset, &ABORT_REASONS),
        Operand::CecVersion => enumerated(out, frame, offset, &CEC_VERSIONS),
        Operand::PowerStatus => enumerated(out, frame, offset, &POWER_STATUSES),
        Operand::DeviceType => enumerated(out, frame, offset, &DEVICE_TYPES),
        Operand::DisplayControl => enumerated(out, frame, offset, &DISPLAY_CONTROLS),
        Operand::SystemAudioStatus => enumerated(out, frame, offset, &SYSTEM_AUDIO_STATUSES),
        Operand::FeatureOpcode => {
            let Some(&value) = frame.get(*offset) else {
                return false;
            };
            push_bracketed(out, opcode_name(value));
            *offset += 1;
            *offset < frame.len()
        }
        Operand::PhysicalAddress => physical_address(out, frame, offset),
        Operand::VendorId => vendor_id(out, frame, offset),
        Operand::AudioStatus => {
            let Some(&value) = frame.get(*offset) else {
                return false;
            };
            let _ = write!(out, "[Mute={},Vol={:02X}]", value >> 7, value & 0x7F);
            *offset += 1;
            *offset < frame.len()
        }
        Operand::AudioFormat => {
            // a sequence of format bytes running to the end of the frame
            while *offset < frame.len() {
                enumerated(out, frame, offset, &AUDIO_FORMATS);
            }
            false
        }
        Operand::ShortAudioDescriptor => short_audio_descriptors(out, frame, offset),
        Operand::UiCommand => ui_command(out, frame, offset),
        Operand::OsdName | Operand::OsdString => ascii_to_end(out, frame, offset),
        Operand::VendorSpecificData => {
            // opaque vendor payload, dumped as hex to the end of the frame
            if *offset >= frame.len() {
                return false;
            }
            let _ = out.push('[');
            while *offset < frame.len() {
                let _ = write!(out, "{:02X}", frame[*offset]);
                *offset += 1;
            }
            let _ = out.push(']');
            false
        }
        _ => placeholder(out, frame, offset),
    }
}

fn physical_address(out: &mut Text, frame: &[u8], offset: &mut usize) -> bool {
    // As an operand of <System Audio Mode Request> the physical address is
    // optional; its absence means "off".
    if frame.get(1) == Some(&0x70) && *offset >= frame.len() {
        push_bracketed(out, "Off");
        return false;
    }
    if *offset + 1 >= frame.len() {
        push_bracketed(out, "?");
        *offset = frame.len();
        return false;
    }
    let hi = frame[*offset];
    let lo = frame[*offset + 1];
    let _ = write!(
        out,
        "[{:x}.{:x}.{:x}.{:x}]",
        (hi >> 4) & 0xF,
        hi & 0xF,
        (lo >> 4) & 0xF,
        lo & 0xF
    );
    *offset += 2;
    *offset < frame.len()
}

fn vendor_id(out: &mut Text, frame: &[u8], offset: &mut usize) -> bool {
    if *offset + 2 >= frame.len() {
        push_bracketed(out, "?");
        *offset = frame.len();
        return false;
    }
    let id = u32::from(frame[*offset]) << 16
        | u32::from(frame[*offset + 1]) << 8
        | u32::from(frame[*offset + 2]);
    match VENDOR_IDS.iter().find(|(known, _)| *known == id) {
        Some((_, name)) => push_bracketed(out, name),
        None => {
            let _ = write!(out, "[ID={:06x}]", id);
        }
    }
    *offset += 3;
    *offset < frame.len()
}

/// A sequence of 3-byte EDID short audio descriptors running to the end of
/// the frame.
fn short_audio_descriptors(out: &mut Text, frame: &[u8], offset: &mut usize) -> bool {
    while *offset + 3 <= frame.len() {
        let descriptor = &frame[*offset..*offset + 3];
        let format = ((descriptor[0] >> 3) & 0x0F) as usize;
        let _ = write!(
            out,
            "[{},num_channels={}",
            AUDIO_FORMATS.get(format).copied().unwrap_or("?"),
            descriptor[0] & 0x07
        );
        let mut rates = descriptor[1];
        let mut bit = 0;
        while rates != 0 {
            if rates & 0x1 != 0 {
                let _ = write!(out, ",{}kHz", AUDIO_SAMPLE_RATES[bit]);
            }
            bit += 1;
            rates >>= 1;
        }
        if format == 1 {
            // LPCM carries the supported sample widths
            let mut widths = descriptor[2] & 0x7;
            let mut index = 0;
            while widths != 0 {
                if widths & 0x1 != 0 {
                    let _ = write!(out, ",{}bits", 16 + 4 * index);
                }
                index += 1;
                widths >>= 1;
            }
        }
        let _ = out.push(']');
        *offset += 3;
    }
    false
}

fn ui_command(out: &mut Text, frame: &[u8], offset: &mut usize) -> bool {
    let Some(&command) = frame.get(*offset) else {
        return false;
    };
    if !enumerated(out, frame, offset, &UI_COMMANDS) {
        return false;
    }
    // A few UI commands carry one extra operand byte.
    match command {
        0x56 | 0x57 | 0x60 | 0x67 | 0x68 | 0x69 | 0x6A => placeholder(out, frame, offset),
        _ => true,
    }
}

/// Text operand running to the end of the frame. Non-printable bytes show
/// as `?`.
fn ascii_to_end(out: &mut Text, frame: &[u8], offset: &mut usize) -> bool {
    if *offset >= frame.len() {
        return false;
    }
    let _ = out.push('[');
    while *offset < frame.len() {
        let byte = frame[*offset];
        let _ = out.push(if (0x20..0x7F).contains(&byte) {
            byte as char
        } else {
            '?'
        });
        *offset += 1;
    }
    let _ = out.push(']');
    false
}
