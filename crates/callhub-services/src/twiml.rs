//! Call-control response documents
//!
//! Webhook responses are small XML documents telling the provider what to
//! do next with the call leg (`<Enqueue>`, `<Dial>`, `<Record>`, ...).

use callhub_core::models::WebhookKind;
use std::fmt::Write;

/// Content type of rendered documents
pub const CONTENT_TYPE: &str = "text/xml";

/// Where a `<Dial>` connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    /// PSTN number
    Number(String),
    /// Registered client (user device)
    Client(String),
    /// Named queue
    Queue(String),
}

/// One instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Say(String),
    Play { url: String, loop_count: u32 },
    Pause { length: u32 },
    Enqueue {
        queue: String,
        wait_url: String,
        action: String,
    },
    Dial {
        target: DialTarget,
        action: Option<String>,
        timeout: Option<u32>,
    },
    Record {
        action: String,
        max_length: u32,
        play_beep: bool,
    },
    Redirect(String),
    Hangup,
}

/// Builder for a `<Response>` document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlDocument {
    verbs: Vec<Verb>,
}

impl ControlDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    pub fn push(mut self, verb: Verb) -> Self {
        self.verbs.push(verb);
        self
    }

    pub fn say(self, text: impl Into<String>) -> Self {
        self.push(Verb::Say(text.into()))
    }

    /// `loop_count` of 0 loops until the caller leaves
    pub fn play(self, url: impl Into<String>, loop_count: u32) -> Self {
        self.push(Verb::Play {
            url: url.into(),
            loop_count,
        })
    }

    pub fn pause(self, length: u32) -> Self {
        self.push(Verb::Pause { length })
    }

    pub fn enqueue(
        self,
        queue: impl Into<String>,
        wait_url: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        self.push(Verb::Enqueue {
            queue: queue.into(),
            wait_url: wait_url.into(),
            action: action.into(),
        })
    }

    pub fn dial(self, target: DialTarget, action: Option<String>, timeout: Option<u32>) -> Self {
        self.push(Verb::Dial {
            target,
            action,
            timeout,
        })
    }

    pub fn record(self, action: impl Into<String>, max_length: u32) -> Self {
        self.push(Verb::Record {
            action: action.into(),
            max_length,
            play_beep: true,
        })
    }

    pub fn redirect(self, url: impl Into<String>) -> Self {
        self.push(Verb::Redirect(url.into()))
    }

    pub fn hangup(self) -> Self {
        self.push(Verb::Hangup)
    }

    /// Render as XML
    pub fn render(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        if self.verbs.is_empty() {
            out.push_str("<Response/>");
            return out;
        }

        out.push_str("<Response>");
        for verb in &self.verbs {
            render_verb(&mut out, verb);
        }
        out.push_str("</Response>");
        out
    }
}

fn render_verb(out: &mut String, verb: &Verb) {
    // Writing into a String cannot fail
    let _ = match verb {
        Verb::Say(text) => write!(out, "<Say>{}</Say>", escape(text)),
        Verb::Play { url, loop_count } => {
            write!(out, "<Play loop=\"{}\">{}</Play>", loop_count, escape(url))
        }
        Verb::Pause { length } => write!(out, "<Pause length=\"{}\"/>", length),
        Verb::Enqueue {
            queue,
            wait_url,
            action,
        } => write!(
            out,
            "<Enqueue waitUrl=\"{}\" waitUrlMethod=\"POST\" action=\"{}\" method=\"POST\">{}</Enqueue>",
            escape(wait_url),
            escape(action),
            escape(queue)
        ),
        Verb::Dial {
            target,
            action,
            timeout,
        } => {
            out.push_str("<Dial");
            if let Some(action) = action {
                let _ = write!(out, " action=\"{}\" method=\"POST\"", escape(action));
            }
            if let Some(timeout) = timeout {
                let _ = write!(out, " timeout=\"{}\"", timeout);
            }
            out.push('>');
            let _ = match target {
                DialTarget::Number(number) => write!(out, "<Number>{}</Number>", escape(number)),
                DialTarget::Client(client) => write!(out, "<Client>{}</Client>", escape(client)),
                DialTarget::Queue(queue) => write!(out, "<Queue>{}</Queue>", escape(queue)),
            };
            write!(out, "</Dial>")
        }
        Verb::Record {
            action,
            max_length,
            play_beep,
        } => write!(
            out,
            "<Record action=\"{}\" method=\"POST\" maxLength=\"{}\" playBeep=\"{}\"/>",
            escape(action),
            max_length,
            play_beep
        ),
        Verb::Redirect(url) => write!(out, "<Redirect method=\"POST\">{}</Redirect>", escape(url)),
        Verb::Hangup => write!(out, "<Hangup/>"),
    };
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Public callback URLs handed to the provider
#[derive(Debug, Clone)]
pub struct CallbackUrls {
    base: String,
}

impl CallbackUrls {
    pub fn new(public_base_url: &str) -> Self {
        Self {
            base: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, kind: WebhookKind) -> String {
        format!("{}/webhooks/voice/{}", self.base, kind)
    }
}
