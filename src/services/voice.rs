//! Voice response documents in the TwiML dialect.

use std::fmt::Write;

use crate::models::Language;

/// Seconds to wait for the caller to start speaking or pressing keys.
pub const GATHER_TIMEOUT_SECS: u32 = 10;
pub const DIAL_TIMEOUT_SECS: u32 = 30;
pub const MAX_RECORDING_SECS: u32 = 180;

#[derive(Debug, Clone, PartialEq)]
pub enum Speech {
    Say { text: String, language: Language },
    Play { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Input {
    Speech,
    Dtmf,
    Both,
}

impl Input {
    fn as_str(&self) -> &'static str {
        match self {
            Input::Speech => "speech",
            Input::Dtmf => "dtmf",
            Input::Both => "speech dtmf",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gather {
    pub input: Input,
    pub action: String,
    pub language: Language,
    pub num_digits: Option<u8>,
    pub hints: Option<String>,
    pub prompts: Vec<Speech>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verb {
    Speak(Speech),
    Gather(Gather),
    Redirect {
        url: String,
    },
    Dial {
        number: String,
        caller_id: String,
        action: String,
    },
    Record {
        action: String,
        transcribe_callback: Option<String>,
    },
    Hangup,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceResponse {
    pub verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>, language: Language) -> Self {
        self.verbs.push(Verb::Speak(Speech::Say {
            text: text.into(),
            language,
        }));
        self
    }

    pub fn play(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Speak(Speech::Play { url: url.into() }));
        self
    }

    pub fn gather(mut self, gather: Gather) -> Self {
        self.verbs.push(Verb::Gather(gather));
        self
    }

    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Redirect { url: url.into() });
        self
    }

    pub fn dial(
        mut self,
        number: impl Into<String>,
        caller_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        self.verbs.push(Verb::Dial {
            number: number.into(),
            caller_id: caller_id.into(),
            action: action.into(),
        });
        self
    }

    pub fn record(mut self, action: impl Into<String>, transcribe_callback: Option<String>) -> Self {
        self.verbs.push(Verb::Record {
            action: action.into(),
            transcribe_callback,
        });
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    /// Every piece of speech in the document, including gather prompts.
    pub fn speech_mut(&mut self) -> Vec<&mut Speech> {
        let mut out = Vec::new();
        for verb in &mut self.verbs {
            match verb {
                Verb::Speak(speech) => out.push(speech),
                Verb::Gather(gather) => out.extend(gather.prompts.iter_mut()),
                _ => {}
            }
        }
        out
    }

    /// Text of every `Say`, in document order.
    pub fn spoken_text(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for verb in &self.verbs {
            let prompts: &[Speech] = match verb {
                Verb::Speak(speech) => std::slice::from_ref(speech),
                Verb::Gather(gather) => &gather.prompts,
                _ => &[],
            };
            for speech in prompts {
                if let Speech::Say { text, .. } = speech {
                    out.push(text.as_str());
                }
            }
        }
        out
    }

    pub fn render(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for verb in &self.verbs {
            render_verb(&mut xml, verb);
        }
        xml.push_str("</Response>");
        xml
    }
}

impl Gather {
    pub fn new(input: Input, action: impl Into<String>, language: Language) -> Self {
        Self {
            input,
            action: action.into(),
            language,
            num_digits: None,
            hints: None,
            prompts: Vec::new(),
        }
    }

    pub fn single_digit(mut self) -> Self {
        self.num_digits = Some(1);
        self
    }

    pub fn hints(mut self, hints: impl Into<String>) -> Self {
        self.hints = Some(hints.into());
        self
    }

    pub fn prompt(mut self, text: impl Into<String>) -> Self {
        self.prompts.push(Speech::Say {
            text: text.into(),
            language: self.language,
        });
        self
    }
}

fn render_speech(xml: &mut String, speech: &Speech) {
    match speech {
        Speech::Say { text, language } => {
            let _ = write!(
                xml,
                r#"<Say voice="{}" language="{}">{}</Say>"#,
                language.builtin_voice(),
                language.locale(),
                escape(text)
            );
        }
        Speech::Play { url } => {
            let _ = write!(xml, "<Play>{}</Play>", escape(url));
        }
    }
}

fn render_verb(xml: &mut String, verb: &Verb) {
    match verb {
        Verb::Speak(speech) => render_speech(xml, speech),
        Verb::Gather(g) => {
            let _ = write!(
                xml,
                r#"<Gather input="{}" action="{}" method="POST" timeout="{}" speechTimeout="auto" language="{}""#,
                g.input.as_str(),
                escape(&g.action),
                GATHER_TIMEOUT_SECS,
                g.language.locale()
            );
            if let Some(n) = g.num_digits {
                let _ = write!(xml, r#" numDigits="{n}""#);
            }
            if let Some(hints) = &g.hints {
                let _ = write!(xml, r#" hints="{}""#, escape(hints));
            }
            xml.push('>');
            for prompt in &g.prompts {
                render_speech(xml, prompt);
            }
            xml.push_str("</Gather>");
        }
        Verb::Redirect { url } => {
            let _ = write!(xml, r#"<Redirect method="POST">{}</Redirect>"#, escape(url));
        }
        Verb::Dial {
            number,
            caller_id,
            action,
        } => {
            let _ = write!(
                xml,
                r#"<Dial callerId="{}" timeout="{}" action="{}" method="POST"><Number>{}</Number></Dial>"#,
                escape(caller_id),
                DIAL_TIMEOUT_SECS,
                escape(action),
                escape(number)
            );
        }
        Verb::Record {
            action,
            transcribe_callback,
        } => {
            let _ = write!(
                xml,
                r#"<Record action="{}" method="POST" maxLength="{}" playBeep="true""#,
                escape(action),
                MAX_RECORDING_SECS
            );
            if let Some(cb) = transcribe_callback {
                let _ = write!(xml, r#" transcribe="true" transcribeCallback="{}""#, escape(cb));
            }
            xml.push_str("/>");
        }
        Verb::Hangup => xml.push_str("<Hangup/>"),
    }
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_gather_with_redirect() {
        let xml = VoiceResponse::new()
            .gather(
                Gather::new(Input::Both, "https://x.test/voice/turn?t=1&s=ivr_menu", Language::Es)
                    .single_digit()
                    .prompt("Marque 1 para citas"),
            )
            .redirect("https://x.test/voice/turn?t=1&s=ivr_menu")
            .render();

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#));
        assert!(xml.contains(r#"input="speech dtmf""#));
        assert!(xml.contains(r#"action="https://x.test/voice/turn?t=1&amp;s=ivr_menu""#));
        assert!(xml.contains(r#"numDigits="1""#));
        assert!(xml.contains(r#"<Say voice="Polly.Lupe" language="es-MX">Marque 1 para citas</Say>"#));
        assert!(xml.ends_with("</Redirect></Response>"));
    }

    #[test]
    fn test_render_dial_record_hangup() {
        let xml = VoiceResponse::new()
            .dial("+15550001111", "+15551234567", "/voice/turn?s=transfer_specialist")
            .record("/voice/turn?s=voicemail", Some("/voice/transcription".into()))
            .hangup()
            .render();

        assert!(xml.contains(r#"<Dial callerId="+15551234567" timeout="30""#));
        assert!(xml.contains("<Number>+15550001111</Number>"));
        assert!(xml.contains(r#"maxLength="180""#));
        assert!(xml.contains(r#"transcribeCallback="/voice/transcription""#));
        assert!(xml.contains("<Hangup/>"));
    }

    #[test]
    fn test_escape_text() {
        let xml = VoiceResponse::new().say("Tom & Jerry's <Salon>", Language::En).render();
        assert!(xml.contains("Tom &amp; Jerry&apos;s &lt;Salon&gt;"));
    }

    #[test]
    fn test_speech_mut_reaches_gather_prompts() {
        let mut resp = VoiceResponse::new()
            .say("one", Language::En)
            .gather(Gather::new(Input::Speech, "/a", Language::En).prompt("two"))
            .hangup();
        assert_eq!(resp.speech_mut().len(), 2);
        assert_eq!(resp.spoken_text(), vec!["one", "two"]);
    }
}
