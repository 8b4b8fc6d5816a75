//! The call dialogue: one machine for every tenant and language. Each turn
//! decodes the context carried in the callback URL, consumes the caller's
//! input for the waiting step, and answers with the next voice document.

pub mod intent;
pub mod script;

use std::time::Duration;

use crate::db::{self, queries};
use crate::models::{CalendarSource, DialogueContext, Intent, Language, Step, Tenant, Terminal};
use crate::services::ai::summarizer;
use crate::services::availability::{self, PAGE_SIZE};
use crate::services::booking::{self, BookingOutcome, BookingRequest};
use crate::services::voice::{Gather, Input, Speech, VoiceResponse};
use crate::services::{context, dates, phone, transfer};
use crate::state::AppState;

use self::intent::{classify, mentions_any, spoken_choice};
use self::script::{fill, script, spell};

/// Re-prompts allowed per step before falling back.
pub const MAX_RETRIES: u8 = 1;

/// Keypad digits 2 through 8 address departments; 9 is voicemail.
const MAX_DEPARTMENTS: usize = 7;
const MORE_DIGIT: usize = 4;

const NAME_PREFIXES: &[&str] = &[
    "my name is ",
    "this is ",
    "it's ",
    "it is ",
    "i'm ",
    "i am ",
    "mi nombre es ",
    "me llamo ",
    "soy ",
];

/// What the telephony provider posted back for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub speech: Option<String>,
    pub digits: Option<String>,
    pub dial_status: Option<String>,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
}

impl TurnInput {
    pub fn speech(&self) -> Option<&str> {
        self.speech.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn digits(&self) -> Option<&str> {
        self.digits.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// The first keypad digit, if any.
    fn digit(&self) -> Option<usize> {
        self.digits()
            .and_then(|d| d.chars().next())
            .and_then(|c| c.to_digit(10))
            .map(|d| d as usize)
    }
}

pub struct Dialogue<'a> {
    state: &'a AppState,
    tenant: &'a Tenant,
}

impl<'a> Dialogue<'a> {
    pub fn new(state: &'a AppState, tenant: &'a Tenant) -> Self {
        Self { state, tenant }
    }

    fn url(&self, path: &str, ctx: &DialogueContext) -> String {
        format!(
            "{}{path}?{}",
            self.state.config.public_base_url,
            context::encode(ctx)
        )
    }

    fn turn_url(&self, ctx: &DialogueContext) -> String {
        self.url("/voice/turn", ctx)
    }

    /// First document of a call answered by the agent.
    pub fn start(&self, caller: &str, call_id: &str) -> VoiceResponse {
        let mut ctx = DialogueContext::new(self.tenant, caller, call_id);
        tracing::info!(
            tenant_id = self.tenant.id,
            call_id = %call_id,
            languages = self.tenant.languages.len(),
            "call started"
        );
        let first = if self.tenant.is_multilingual() {
            Step::LanguageSelect
        } else {
            Step::Greeting
        };
        self.enter(&mut ctx, first, VoiceResponse::new())
    }

    /// The agent is switched off: connect the caller to the owner. The
    /// business phone forwards into this line, so it is never a target.
    pub fn forward(&self, caller: &str, call_id: &str) -> VoiceResponse {
        let mut ctx = DialogueContext::new(self.tenant, caller, call_id);
        ctx.advance(Step::TransferToSpecialist);
        let s = script(ctx.language);
        let target = self.tenant.owner_phone.clone();
        tracing::info!(tenant_id = self.tenant.id, call_id = %call_id, "agent disabled, forwarding");
        match target {
            Some(number) => self.dial(&mut ctx, VoiceResponse::new(), &number, s.forwarding),
            None => self.enter(&mut ctx, Step::Voicemail, VoiceResponse::new()),
        }
    }

    /// Usage is exhausted: apologize and take a message.
    pub fn voicemail_only(&self, caller: &str, call_id: &str) -> VoiceResponse {
        let mut ctx = DialogueContext::new(self.tenant, caller, call_id);
        ctx.advance(Step::Voicemail);
        let resp = VoiceResponse::new().say(script(ctx.language).unavailable, ctx.language);
        self.record(&ctx, resp)
    }

    /// Ends a call whose context could not be decoded.
    pub fn expired(&self, caller: &str, call_id: &str) -> VoiceResponse {
        let ctx = DialogueContext::new(self.tenant, caller, call_id);
        VoiceResponse::new()
            .say(script(ctx.language).session_expired, ctx.language)
            .hangup()
    }

    /// Consumes the caller's input for the step the context is waiting on.
    pub async fn turn(&self, mut ctx: DialogueContext, input: &TurnInput) -> VoiceResponse {
        tracing::debug!(
            tenant_id = ctx.tenant_id,
            call_id = %ctx.call_id,
            step = ctx.step.as_str(),
            retries = ctx.retries,
            "dialogue turn"
        );
        let ctx = &mut ctx;
        match ctx.step {
            Step::LanguageSelect => self.on_language(ctx, input),
            Step::Greeting => self.enter(ctx, Step::Greeting, VoiceResponse::new()),
            Step::IvrMenu => self.on_ivr(ctx, input),
            Step::IntentClassify => self.on_intent(ctx, input),
            Step::CollectName => self.on_name(ctx, input),
            Step::CollectPhone => self.on_phone(ctx, input),
            Step::CollectDate => self.on_date(ctx, input).await,
            Step::OfferSlots | Step::SelectSlot => self.on_select(ctx, input).await,
            Step::ConfirmBooking => self.confirm(ctx, VoiceResponse::new()).await,
            Step::Voicemail => self.on_recording(ctx, input),
            Step::TransferToDepartment | Step::TransferToSpecialist => {
                self.on_dial_result(ctx, input)
            }
            Step::Terminal(_) => VoiceResponse::new().hangup(),
        }
    }

    /// Moves to `step` and appends its prompt to `resp`. Steps that need no
    /// caller input chain straight into the next one.
    pub fn enter(&self, ctx: &mut DialogueContext, step: Step, resp: VoiceResponse) -> VoiceResponse {
        let lang = ctx.language;
        let s = script(lang);
        match step {
            Step::LanguageSelect => {
                ctx.advance(step);
                let mut gather = Gather::new(Input::Both, self.turn_url(ctx), lang)
                    .single_digit()
                    .hints("english, español");
                for (i, language) in self.tenant.languages.iter().enumerate() {
                    let digit = (i + 1).to_string();
                    gather.prompts.push(Speech::Say {
                        text: fill(script(*language).language_option, &[("digit", digit.as_str())]),
                        language: *language,
                    });
                }
                ask(resp, gather)
            }
            Step::Greeting => {
                ctx.advance(step);
                let greeting = match self.tenant.custom_greeting(lang) {
                    Some(custom) => custom.to_string(),
                    None => fill(s.greeting, &[("business", ctx.business_name.as_str())]),
                };
                let resp = resp.say(greeting, lang);
                let next = if self.tenant.uses_ivr() {
                    Step::IvrMenu
                } else {
                    Step::IntentClassify
                };
                self.enter(ctx, next, resp)
            }
            Step::IvrMenu => {
                ctx.advance(step);
                let mut gather = Gather::new(Input::Both, self.turn_url(ctx), lang)
                    .single_digit()
                    .prompt(s.ivr_booking);
                for (i, dept) in self.departments().iter().enumerate() {
                    let digit = (i + 2).to_string();
                    gather = gather.prompt(fill(
                        s.ivr_department,
                        &[("department", dept.name.as_str()), ("digit", digit.as_str())],
                    ));
                }
                ask(resp, gather.prompt(s.ivr_voicemail))
            }
            Step::IntentClassify => {
                ctx.advance(step);
                let gather = Gather::new(Input::Speech, self.turn_url(ctx), lang).prompt(s.how_can_help);
                ask(resp, gather)
            }
            Step::CollectName => {
                ctx.advance(step);
                let gather = Gather::new(Input::Speech, self.turn_url(ctx), lang).prompt(s.ask_name);
                ask(resp, gather)
            }
            Step::CollectPhone => {
                ctx.advance(step);
                let name = ctx.name.clone().unwrap_or_default();
                let gather = Gather::new(Input::Both, self.turn_url(ctx), lang)
                    .prompt(fill(s.ask_phone, &[("name", name.as_str())]));
                ask(resp, gather)
            }
            Step::CollectDate => {
                ctx.advance(step);
                let prompt = match ctx.date {
                    Some(date) if ctx.date_attempts > 0 => {
                        fill(s.no_openings, &[("date", s.say_date(date).as_str())])
                    }
                    _ => s.ask_date.to_string(),
                };
                let gather = Gather::new(Input::Speech, self.turn_url(ctx), lang).prompt(prompt);
                ask(resp, gather)
            }
            Step::OfferSlots | Step::SelectSlot => self.offer(ctx, resp),
            Step::ConfirmBooking => {
                ctx.advance(step);
                resp.redirect(self.turn_url(ctx))
            }
            Step::Voicemail => {
                ctx.advance(step);
                self.record(ctx, resp.say(s.voicemail_prompt, lang))
            }
            Step::TransferToDepartment => {
                ctx.advance(step);
                let number = ctx
                    .department
                    .and_then(|i| self.departments().get(i).map(|d| d.phone.clone()));
                match number {
                    Some(number) => self.dial(ctx, resp, &number, s.transferring),
                    None => self.enter(ctx, Step::Voicemail, resp),
                }
            }
            Step::TransferToSpecialist => {
                ctx.advance(step);
                match self.tenant.owner_phone.clone() {
                    Some(owner) => self.dial(ctx, resp, &owner, s.transferring),
                    None => self.enter(ctx, Step::Voicemail, resp),
                }
            }
            Step::Terminal(Terminal::Failure) => {
                ctx.advance(step);
                resp.say(s.booking_failed, lang).hangup()
            }
            Step::Terminal(_) => {
                ctx.advance(step);
                resp.say(s.goodbye, lang).hangup()
            }
        }
    }

    fn departments(&self) -> Vec<&crate::models::IvrDepartment> {
        let mut departments = self.tenant.enabled_departments();
        departments.truncate(MAX_DEPARTMENTS);
        departments
    }

    /// Re-prompts the current step once, then gives up on it.
    fn retry_or(&self, ctx: &mut DialogueContext, fallback: Step) -> VoiceResponse {
        let s = script(ctx.language);
        if ctx.retries < MAX_RETRIES {
            ctx.retries += 1;
            let step = ctx.step;
            let resp = VoiceResponse::new().say(s.not_understood, ctx.language);
            return self.enter(ctx, step, resp);
        }
        tracing::info!(
            tenant_id = ctx.tenant_id,
            call_id = %ctx.call_id,
            step = ctx.step.as_str(),
            fallback = fallback.as_str(),
            "no usable input, falling back"
        );
        self.enter(ctx, fallback, VoiceResponse::new())
    }

    /// Dials `number` when it cannot loop back into this line; otherwise the
    /// owner, otherwise voicemail.
    fn dial(
        &self,
        ctx: &mut DialogueContext,
        resp: VoiceResponse,
        number: &str,
        announcement: &str,
    ) -> VoiceResponse {
        match transfer::safe_destination(number, self.tenant) {
            Some(destination) => {
                tracing::info!(
                    tenant_id = ctx.tenant_id,
                    call_id = %ctx.call_id,
                    step = ctx.step.as_str(),
                    "transferring call"
                );
                let action = self.turn_url(ctx);
                resp.say(announcement, ctx.language).dial(
                    phone::to_e164(&destination),
                    phone::to_e164(&self.tenant.did),
                    action,
                )
            }
            None => self.enter(ctx, Step::Voicemail, resp),
        }
    }

    fn record(&self, ctx: &DialogueContext, resp: VoiceResponse) -> VoiceResponse {
        let transcription = ctx
            .language
            .supports_transcription()
            .then(|| self.url("/voice/transcription", ctx));
        resp.record(self.turn_url(ctx), transcription)
            .say(script(ctx.language).goodbye, ctx.language)
            .hangup()
    }

    /// Reads the current page of the availability snapshot.
    fn offer(&self, ctx: &mut DialogueContext, resp: VoiceResponse) -> VoiceResponse {
        if ctx.available.is_empty() {
            ctx.date_attempts = ctx.date_attempts.saturating_add(1);
            tracing::info!(
                tenant_id = ctx.tenant_id,
                call_id = %ctx.call_id,
                date = ?ctx.date,
                attempts = ctx.date_attempts,
                "no availability"
            );
            let next = if ctx.date_attempts <= 1 {
                Step::CollectDate
            } else {
                Step::TransferToSpecialist
            };
            return self.enter(ctx, next, resp);
        }

        let page = availability::paginate(&ctx.available, ctx.offset, PAGE_SIZE);
        if page.offered.is_empty() {
            return self.enter(ctx, Step::TransferToSpecialist, resp);
        }
        ctx.offered = page.offered;
        ctx.has_more = page.has_more;
        ctx.advance(Step::SelectSlot);

        let lang = ctx.language;
        let s = script(lang);
        let mut gather = Gather::new(Input::Both, self.turn_url(ctx), lang).single_digit();
        if ctx.offset == 0 {
            let date = ctx.date.map(|d| s.say_date(d)).unwrap_or_default();
            gather = gather.prompt(fill(s.offer_intro, &[("date", date.as_str())]));
        }
        for (i, time) in ctx.offered.iter().enumerate() {
            let digit = (i + 1).to_string();
            gather = gather.prompt(fill(
                s.offer_option,
                &[("time", s.say_time(*time).as_str()), ("digit", digit.as_str())],
            ));
        }
        if ctx.has_more {
            gather = gather.prompt(s.offer_more);
        }
        ask(resp, gather.prompt(s.offer_specialist))
    }

    fn on_language(&self, ctx: &mut DialogueContext, input: &TurnInput) -> VoiceResponse {
        let serves = |language: Language| self.tenant.languages.contains(&language);
        let chosen = if let Some(digit) = input.digit() {
            digit
                .checked_sub(1)
                .and_then(|i| self.tenant.languages.get(i).copied())
        } else if let Some(text) = input.speech() {
            if mentions_any(text, intent::SPANISH_WORDS) && serves(Language::Es) {
                Some(Language::Es)
            } else if mentions_any(text, intent::ENGLISH_WORDS) && serves(Language::En) {
                Some(Language::En)
            } else {
                spoken_choice(text)
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| self.tenant.languages.get(i).copied())
            }
        } else {
            None
        };

        match chosen {
            Some(language) => {
                ctx.language = language;
                self.enter(ctx, Step::Greeting, VoiceResponse::new())
            }
            None => {
                if ctx.retries >= MAX_RETRIES {
                    ctx.language = self.tenant.default_language();
                }
                self.retry_or(ctx, Step::Greeting)
            }
        }
    }

    /// Maps an IVR number to the step it selects.
    fn ivr_option(&self, ctx: &mut DialogueContext, n: usize) -> Option<Step> {
        match n {
            1 => Some(Step::CollectName),
            9 => Some(Step::Voicemail),
            d if d >= 2 && d - 2 < self.departments().len() => {
                ctx.department = Some(d - 2);
                Some(Step::TransferToDepartment)
            }
            _ => None,
        }
    }

    fn on_ivr(&self, ctx: &mut DialogueContext, input: &TurnInput) -> VoiceResponse {
        let lang = ctx.language;
        let next = if let Some(digit) = input.digit() {
            self.ivr_option(ctx, digit)
        } else if let Some(text) = input.speech() {
            match classify(text, lang) {
                Some(Intent::Book) => Some(Step::CollectName),
                Some(Intent::Voicemail) => Some(Step::Voicemail),
                _ => {
                    let named = self
                        .departments()
                        .iter()
                        .position(|dept| mentions_any(text, &[dept.name.as_str()]));
                    match named {
                        Some(i) => {
                            ctx.department = Some(i);
                            Some(Step::TransferToDepartment)
                        }
                        None => spoken_choice(text).and_then(|n| self.ivr_option(ctx, n)),
                    }
                }
            }
        } else {
            None
        };

        match next {
            Some(step) => self.enter(ctx, step, VoiceResponse::new()),
            None => self.retry_or(ctx, Step::Terminal(Terminal::Hangup)),
        }
    }

    fn on_intent(&self, ctx: &mut DialogueContext, input: &TurnInput) -> VoiceResponse {
        let intent = input.speech().and_then(|text| classify(text, ctx.language));
        tracing::info!(
            tenant_id = ctx.tenant_id,
            call_id = %ctx.call_id,
            intent = ?intent,
            "caller intent"
        );
        let next = match intent {
            Some(Intent::Book) => Step::CollectName,
            Some(Intent::Voicemail) => Step::Voicemail,
            Some(Intent::Pricing) | Some(Intent::Support) => Step::TransferToSpecialist,
            None => return self.retry_or(ctx, Step::TransferToSpecialist),
        };
        self.enter(ctx, next, VoiceResponse::new())
    }

    fn on_name(&self, ctx: &mut DialogueContext, input: &TurnInput) -> VoiceResponse {
        match input.speech().map(clean_name).filter(|n| !n.is_empty()) {
            Some(name) => {
                ctx.name = Some(name);
                self.enter(ctx, Step::CollectPhone, VoiceResponse::new())
            }
            None => self.retry_or(ctx, Step::TransferToSpecialist),
        }
    }

    fn on_phone(&self, ctx: &mut DialogueContext, input: &TurnInput) -> VoiceResponse {
        let captured = if let Some(digits) = input.digits() {
            phone::normalize(digits)
        } else if let Some(text) = input.speech() {
            phone::normalize_spoken(text)
        } else {
            return self.retry_or(ctx, Step::TransferToSpecialist);
        };

        match captured.or_else(|| phone::normalize(&ctx.caller)) {
            Some(number) => {
                ctx.phone = Some(number);
                self.enter(ctx, Step::CollectDate, VoiceResponse::new())
            }
            None => self.retry_or(ctx, Step::TransferToSpecialist),
        }
    }

    async fn on_date(&self, ctx: &mut DialogueContext, input: &TurnInput) -> VoiceResponse {
        let Some(text) = input.speech().or_else(|| input.digits()) else {
            return self.retry_or(ctx, Step::TransferToSpecialist);
        };
        let date = dates::resolve(text, self.tenant.today());
        tracing::debug!(call_id = %ctx.call_id, heard = %text, %date, "date resolved");
        match self.snapshot(ctx, date).await {
            Ok(()) => self.enter(ctx, Step::OfferSlots, VoiceResponse::new()),
            Err(e) => {
                tracing::error!(tenant_id = ctx.tenant_id, error = %e, "availability lookup failed");
                self.enter(ctx, Step::TransferToSpecialist, VoiceResponse::new())
            }
        }
    }

    /// Queries availability for `date` once and keeps it in the context.
    async fn snapshot(&self, ctx: &mut DialogueContext, date: chrono::NaiveDate) -> anyhow::Result<()> {
        let found = availability::resolve(
            &self.state.db,
            self.state.calendar.as_ref(),
            self.tenant,
            date,
            self.tenant.local_now(),
            self.state.config.calendar_timeout,
        )
        .await?;
        ctx.date = Some(date);
        ctx.available = found.slots;
        ctx.source = Some(found.source);
        ctx.offset = 0;
        ctx.offered.clear();
        ctx.has_more = false;
        ctx.selected = None;
        Ok(())
    }

    async fn on_select(&self, ctx: &mut DialogueContext, input: &TurnInput) -> VoiceResponse {
        let choice = input.digit().or_else(|| {
            input.speech().and_then(|text| {
                if mentions_any(text, intent::SPECIALIST_WORDS) {
                    Some(0)
                } else if mentions_any(text, intent::MORE_WORDS) {
                    Some(MORE_DIGIT)
                } else {
                    spoken_choice(text)
                }
            })
        });

        match choice {
            Some(0) => self.enter(ctx, Step::TransferToSpecialist, VoiceResponse::new()),
            Some(MORE_DIGIT) if ctx.has_more => {
                ctx.offset += PAGE_SIZE;
                ctx.retries = 0;
                self.enter(ctx, Step::OfferSlots, VoiceResponse::new())
            }
            Some(n) if (1..=ctx.offered.len()).contains(&n) => {
                ctx.selected = Some(ctx.offered[n - 1]);
                ctx.advance(Step::ConfirmBooking);
                self.confirm(ctx, VoiceResponse::new()).await
            }
            _ => self.retry_or(ctx, Step::TransferToSpecialist),
        }
    }

    async fn confirm(&self, ctx: &mut DialogueContext, resp: VoiceResponse) -> VoiceResponse {
        ctx.advance(Step::ConfirmBooking);
        let lang = ctx.language;
        let s = script(lang);

        let customer_phone = ctx.phone.clone().or_else(|| phone::normalize(&ctx.caller));
        let (Some(name), Some(customer_phone), Some(date), Some(time)) =
            (ctx.name.clone(), customer_phone, ctx.date, ctx.selected)
        else {
            tracing::warn!(call_id = %ctx.call_id, "booking reached without complete details");
            return self.enter(ctx, Step::Terminal(Terminal::Failure), resp);
        };

        let req = BookingRequest {
            customer_name: name,
            customer_phone,
            date,
            time,
            source: "voice".into(),
        };
        let now = self.tenant.local_now();
        let outcome = db::lock(&self.state.db).and_then(|conn| {
            booking::book_within(&conn, self.tenant, &req, now, &ctx.available)
                .map_err(anyhow::Error::from)
        });

        match outcome {
            Ok(BookingOutcome::Booked(appointment)) => {
                tracing::info!(
                    tenant_id = ctx.tenant_id,
                    call_id = %ctx.call_id,
                    appointment_id = %appointment.id,
                    "appointment booked by phone"
                );
                ctx.advance(Step::Terminal(Terminal::Success));
                self.notify(&appointment, lang).await;
                let line = fill(
                    s.booked,
                    &[
                        ("date", s.say_date(appointment.date).as_str()),
                        ("time", s.say_time(appointment.time).as_str()),
                        ("code", spell(&appointment.confirmation_code).as_str()),
                        ("business", self.tenant.business_name.as_str()),
                    ],
                );
                resp.say(line, lang).hangup()
            }
            Ok(BookingOutcome::SlotTaken { alternatives }) => {
                tracing::info!(call_id = %ctx.call_id, %date, %time, "slot taken during confirmation");
                let resp = resp.say(s.slot_taken, lang);
                if let Err(e) = self.snapshot(ctx, date).await {
                    tracing::warn!(error = %e, "availability requery failed, offering alternatives");
                    ctx.available = alternatives;
                    ctx.available.sort();
                    ctx.offset = 0;
                    ctx.selected = None;
                }
                self.enter(ctx, Step::OfferSlots, resp)
            }
            Err(e) => {
                tracing::error!(tenant_id = ctx.tenant_id, call_id = %ctx.call_id, error = %e, "booking failed");
                self.enter(ctx, Step::Terminal(Terminal::Failure), resp)
            }
        }
    }

    /// Best-effort calendar write and confirmation text, run together.
    async fn notify(&self, appointment: &crate::models::Appointment, lang: Language) {
        let timeout = self.state.config.calendar_timeout;
        let tenant = self.tenant;

        let calendar = async {
            if !matches!(tenant.calendar_source, CalendarSource::External(_)) {
                return;
            }
            let write = self.state.calendar.record_appointment(tenant, appointment);
            match tokio::time::timeout(timeout, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(appointment_id = %appointment.id, error = %e, "calendar write failed"),
                Err(_) => tracing::warn!(appointment_id = %appointment.id, "calendar write timed out"),
            }
        };

        let sms = async {
            let s = script(lang);
            let body = fill(
                s.sms_confirmation,
                &[
                    ("business", tenant.business_name.as_str()),
                    ("date", s.say_date(appointment.date).as_str()),
                    ("time", s.say_time(appointment.time).as_str()),
                    ("code", appointment.confirmation_code.as_str()),
                ],
            );
            let send = self.state.messaging.send_message(&appointment.customer_phone, &body);
            match tokio::time::timeout(timeout.max(Duration::from_secs(1)), send).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(appointment_id = %appointment.id, error = %e, "confirmation sms failed"),
                Err(_) => tracing::warn!(appointment_id = %appointment.id, "confirmation sms timed out"),
            }
        };

        tokio::join!(calendar, sms);
    }

    fn on_recording(&self, ctx: &mut DialogueContext, input: &TurnInput) -> VoiceResponse {
        let lang = ctx.language;
        let Some(url) = input.recording_url.as_deref().filter(|u| !u.is_empty()) else {
            return self.enter(ctx, Step::Terminal(Terminal::Hangup), VoiceResponse::new());
        };

        let message = queries::NewMessage {
            tenant_id: ctx.tenant_id,
            call_id: &ctx.call_id,
            from_number: &ctx.caller,
            recording_url: Some(url),
            recording_sid: input.recording_sid.as_deref(),
            summary: summarizer::placeholder(lang),
            language: lang,
        };
        match db::lock(&self.state.db).and_then(|conn| queries::insert_message(&conn, &message)) {
            Ok(()) => tracing::info!(tenant_id = ctx.tenant_id, call_id = %ctx.call_id, "voicemail stored"),
            Err(e) => tracing::error!(tenant_id = ctx.tenant_id, error = %e, "failed to store voicemail"),
        }

        ctx.advance(Step::Terminal(Terminal::Hangup));
        VoiceResponse::new().say(script(lang).voicemail_saved, lang).hangup()
    }

    fn on_dial_result(&self, ctx: &mut DialogueContext, input: &TurnInput) -> VoiceResponse {
        match input.dial_status.as_deref() {
            Some("completed") | Some("answered") => {
                ctx.advance(Step::Terminal(Terminal::Hangup));
                VoiceResponse::new().hangup()
            }
            status => {
                tracing::info!(call_id = %ctx.call_id, status = ?status, "transfer not answered");
                let resp = VoiceResponse::new().say(script(ctx.language).no_answer, ctx.language);
                self.enter(ctx, Step::Voicemail, resp)
            }
        }
    }
}

/// Summarizes a transcribed voicemail. A summarizer failure keeps the
/// placeholder summary.
pub async fn record_transcription(
    state: &AppState,
    ctx: &DialogueContext,
    recording_sid: &str,
    transcript: &str,
) -> anyhow::Result<()> {
    let summary = match state.summarizer.summarize(transcript, ctx.language).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::warn!(call_id = %ctx.call_id, error = %e, "voicemail summary failed, keeping placeholder");
            return Ok(());
        }
    };

    let conn = db::lock(&state.db)?;
    if !queries::update_message_summary(&conn, recording_sid, &summary)? {
        // transcription arrived before the recording callback
        queries::insert_message(
            &conn,
            &queries::NewMessage {
                tenant_id: ctx.tenant_id,
                call_id: &ctx.call_id,
                from_number: &ctx.caller,
                recording_url: None,
                recording_sid: Some(recording_sid),
                summary: &summary,
                language: ctx.language,
            },
        )?;
    }
    tracing::info!(tenant_id = ctx.tenant_id, call_id = %ctx.call_id, "voicemail summarized");
    Ok(())
}

/// A gather followed by a redirect back to the same step, so silence is
/// handled like unrecognized input.
fn ask(resp: VoiceResponse, gather: Gather) -> VoiceResponse {
    let action = gather.action.clone();
    resp.gather(gather).redirect(action)
}

fn clean_name(heard: &str) -> String {
    let mut name = heard.trim().trim_end_matches('.').trim();
    for prefix in NAME_PREFIXES {
        if name
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            name = name[prefix.len()..].trim();
            break;
        }
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::IvrDepartment;
    use crate::services::ai::summarizer::VoicemailSummarizer;
    use crate::services::calendar::NoCalendar;
    use crate::services::messaging::MessagingProvider;
    use crate::services::speech::BuiltinVoice;
    use crate::services::tenant::DbUsageGate;
    use crate::services::voice::Verb;
    use async_trait::async_trait;

    struct SilentMessaging;

    #[async_trait]
    impl MessagingProvider for SilentMessaging {
        async fn send_message(&self, _to: &str, _body: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct EchoSummarizer;

    #[async_trait]
    impl VoicemailSummarizer for EchoSummarizer {
        async fn summarize(&self, transcript: &str, _language: Language) -> anyhow::Result<String> {
            Ok(format!("summary: {transcript}"))
        }
    }

    fn test_state() -> AppState {
        let conn = db::init_db(":memory:").unwrap();
        let db = db::shared(conn);
        AppState {
            db: db.clone(),
            config: AppConfig::local(),
            summarizer: Box::new(EchoSummarizer),
            messaging: Box::new(SilentMessaging),
            calendar: Box::new(NoCalendar),
            speech: Box::new(BuiltinVoice),
            usage: Box::new(DbUsageGate::new(db)),
        }
    }

    fn tenant() -> Tenant {
        serde_json::from_value(serde_json::json!({
            "id": 7,
            "business_name": "Bright Smile Dental",
            "did": "15551230000",
            "owner_phone": "15559876543",
        }))
        .unwrap()
    }

    fn speech(text: &str) -> TurnInput {
        TurnInput {
            speech: Some(text.into()),
            ..TurnInput::default()
        }
    }

    fn digits(d: &str) -> TurnInput {
        TurnInput {
            digits: Some(d.into()),
            ..TurnInput::default()
        }
    }

    /// Context that the response's gather would post back with.
    fn next_ctx(resp: &VoiceResponse) -> DialogueContext {
        let url = resp
            .verbs
            .iter()
            .find_map(|verb| match verb {
                Verb::Gather(gather) => Some(gather.action.clone()),
                Verb::Dial { action, .. } => Some(action.clone()),
                Verb::Record { action, .. } => Some(action.clone()),
                _ => None,
            })
            .expect("response waits for input");
        let query = url.split_once('?').unwrap().1;
        context::decode(query).unwrap()
    }

    fn dialed(resp: &VoiceResponse) -> Option<String> {
        resp.verbs.iter().find_map(|verb| match verb {
            Verb::Dial { number, .. } => Some(number.clone()),
            _ => None,
        })
    }

    fn records(resp: &VoiceResponse) -> bool {
        resp.verbs.iter().any(|v| matches!(v, Verb::Record { .. }))
    }

    #[test]
    fn test_start_greets_and_asks_intent() {
        let state = test_state();
        let tenant = tenant();
        let resp = Dialogue::new(&state, &tenant).start("15550001111", "CA1");
        let text = resp.spoken_text().join(" ");
        assert!(text.contains("Bright Smile Dental"));
        assert_eq!(next_ctx(&resp).step, Step::IntentClassify);
        assert!(matches!(resp.verbs.last(), Some(Verb::Redirect { .. })));
    }

    #[test]
    fn test_multilingual_tenant_starts_with_language_select() {
        let state = test_state();
        let mut tenant = tenant();
        tenant.languages = vec![Language::En, Language::Es];
        let resp = Dialogue::new(&state, &tenant).start("15550001111", "CA1");
        assert_eq!(next_ctx(&resp).step, Step::LanguageSelect);
        assert!(resp.spoken_text().iter().any(|t| t.contains("español")));
    }

    #[tokio::test]
    async fn test_language_select_by_digit_and_fallback() {
        let state = test_state();
        let mut tenant = tenant();
        tenant.languages = vec![Language::En, Language::Es];
        let dialogue = Dialogue::new(&state, &tenant);
        let ctx = next_ctx(&dialogue.start("15550001111", "CA1"));

        let resp = dialogue.turn(ctx.clone(), &digits("2")).await;
        let chosen = next_ctx(&resp);
        assert_eq!(chosen.language, Language::Es);
        assert_eq!(chosen.step, Step::IntentClassify);

        let retry = dialogue.turn(ctx, &TurnInput::default()).await;
        let retry_ctx = next_ctx(&retry);
        assert_eq!(retry_ctx.step, Step::LanguageSelect);
        assert_eq!(retry_ctx.retries, 1);

        let fallback = dialogue.turn(retry_ctx, &TurnInput::default()).await;
        let fallback_ctx = next_ctx(&fallback);
        assert_eq!(fallback_ctx.language, Language::En);
        assert_eq!(fallback_ctx.step, Step::IntentClassify);
    }

    #[tokio::test]
    async fn test_two_silent_name_turns_transfer_to_specialist() {
        let state = test_state();
        let tenant = tenant();
        let dialogue = Dialogue::new(&state, &tenant);
        let ctx = next_ctx(&dialogue.start("15550001111", "CA1"));
        let ctx = next_ctx(&dialogue.turn(ctx, &speech("I want to book an appointment")).await);
        assert_eq!(ctx.step, Step::CollectName);

        let retry = dialogue.turn(ctx, &TurnInput::default()).await;
        assert!(retry.spoken_text()[0].contains("didn't catch"));
        let ctx = next_ctx(&retry);
        assert_eq!(ctx.step, Step::CollectName);

        let resp = dialogue.turn(ctx, &TurnInput::default()).await;
        assert_eq!(dialed(&resp).as_deref(), Some("+15559876543"));
        assert_eq!(next_ctx(&resp).step, Step::TransferToSpecialist);
    }

    #[tokio::test]
    async fn test_ivr_digits_route_to_departments_and_voicemail() {
        let state = test_state();
        let mut tenant = tenant();
        tenant.ivr_enabled = true;
        tenant.ivr_options = vec![
            IvrDepartment {
                name: "Billing".into(),
                phone: "15554440000".into(),
                enabled: true,
            },
            IvrDepartment {
                name: "Front desk".into(),
                phone: "15551230000".into(),
                enabled: true,
            },
        ];
        let dialogue = Dialogue::new(&state, &tenant);
        let ctx = next_ctx(&dialogue.start("15550001111", "CA1"));
        assert_eq!(ctx.step, Step::IvrMenu);

        let resp = dialogue.turn(ctx.clone(), &digits("2")).await;
        assert_eq!(dialed(&resp).as_deref(), Some("+15554440000"));

        // the front desk number is the line itself, so the owner is dialed
        let resp = dialogue.turn(ctx.clone(), &digits("3")).await;
        assert_eq!(dialed(&resp).as_deref(), Some("+15559876543"));

        let resp = dialogue.turn(ctx.clone(), &digits("9")).await;
        assert!(records(&resp));

        let resp = dialogue.turn(ctx.clone(), &speech("billing please")).await;
        assert_eq!(dialed(&resp).as_deref(), Some("+15554440000"));

        let resp = dialogue.turn(ctx.clone(), &digits("1")).await;
        assert_eq!(next_ctx(&resp).step, Step::CollectName);
    }

    #[tokio::test]
    async fn test_formatted_department_number_dials_as_e164() {
        let state = test_state();
        let mut tenant = tenant();
        tenant.ivr_enabled = true;
        tenant.ivr_options = vec![IvrDepartment {
            name: "Billing".into(),
            phone: "(555) 444-0000".into(),
            enabled: true,
        }];
        let dialogue = Dialogue::new(&state, &tenant);
        let ctx = next_ctx(&dialogue.start("15550001111", "CA1"));

        let resp = dialogue.turn(ctx, &digits("2")).await;
        assert_eq!(dialed(&resp).as_deref(), Some("+15554440000"));
    }

    #[test]
    fn test_forward_dials_owner_never_business_line() {
        let state = test_state();
        let mut tenant = tenant();
        tenant.agent_enabled = false;
        tenant.business_phone = Some("15552220000".into());
        let dialogue = Dialogue::new(&state, &tenant);
        let resp = dialogue.forward("15550001111", "CA1");
        assert_eq!(dialed(&resp).as_deref(), Some("+15559876543"));

        tenant.owner_phone = None;
        let dialogue = Dialogue::new(&state, &tenant);
        let resp = dialogue.forward("15550001111", "CA1");
        assert_eq!(dialed(&resp), None);
        assert!(records(&resp));
    }

    #[tokio::test]
    async fn test_looping_department_without_safe_owner_goes_to_voicemail() {
        let state = test_state();
        let mut tenant = tenant();
        tenant.owner_phone = Some("5551230000".into());
        tenant.ivr_enabled = true;
        tenant.ivr_options = vec![IvrDepartment {
            name: "Sales".into(),
            phone: "+1 555 123 0000".into(),
            enabled: true,
        }];
        let dialogue = Dialogue::new(&state, &tenant);
        let ctx = next_ctx(&dialogue.start("15550001111", "CA1"));
        let resp = dialogue.turn(ctx, &digits("2")).await;
        assert_eq!(dialed(&resp), None);
        assert!(records(&resp));
    }

    #[tokio::test]
    async fn test_ivr_silence_twice_hangs_up() {
        let state = test_state();
        let mut tenant = tenant();
        tenant.ivr_enabled = true;
        tenant.ivr_options = vec![IvrDepartment {
            name: "Billing".into(),
            phone: "15554440000".into(),
            enabled: true,
        }];
        let dialogue = Dialogue::new(&state, &tenant);
        let ctx = next_ctx(&dialogue.start("15550001111", "CA1"));
        let ctx = next_ctx(&dialogue.turn(ctx, &digits("7")).await);
        let resp = dialogue.turn(ctx, &TurnInput::default()).await;
        assert!(matches!(resp.verbs.last(), Some(Verb::Hangup)));
    }

    #[tokio::test]
    async fn test_partial_phone_falls_back_to_caller_id() {
        let state = test_state();
        let tenant = tenant();
        let dialogue = Dialogue::new(&state, &tenant);
        let mut ctx = DialogueContext::new(&tenant, "+1 (555) 000-1111", "CA1");
        ctx.name = Some("Ana".into());
        ctx.step = Step::CollectPhone;
        let resp = dialogue.turn(ctx, &speech("five five five")).await;
        let ctx = next_ctx(&resp);
        assert_eq!(ctx.phone.as_deref(), Some("15550001111"));
        assert_eq!(ctx.step, Step::CollectDate);
    }

    #[tokio::test]
    async fn test_more_pages_through_snapshot() {
        let state = test_state();
        let tenant = tenant();
        let dialogue = Dialogue::new(&state, &tenant);
        let mut ctx = DialogueContext::new(&tenant, "15550001111", "CA1");
        ctx.date = Some(chrono::NaiveDate::from_ymd_opt(2030, 3, 6).unwrap());
        ctx.available = (9..14)
            .map(|h| chrono::NaiveTime::from_hms_opt(h, 0, 0).unwrap())
            .collect();
        let resp = dialogue.enter(&mut ctx, Step::OfferSlots, VoiceResponse::new());
        let ctx = next_ctx(&resp);
        assert_eq!(ctx.offered.len(), 3);
        assert!(ctx.has_more);

        let resp = dialogue.turn(ctx, &speech("more options")).await;
        let ctx = next_ctx(&resp);
        assert_eq!(ctx.offset, 3);
        assert_eq!(
            ctx.offered,
            vec![
                chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                chrono::NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            ]
        );
        assert!(!ctx.has_more);

        // nothing more to hear: re-offer once, then transfer
        let retry = dialogue.turn(ctx, &digits("4")).await;
        let ctx = next_ctx(&retry);
        assert_eq!(ctx.step, Step::SelectSlot);
        let resp = dialogue.turn(ctx, &digits("4")).await;
        assert!(dialed(&resp).is_some());
    }

    #[test]
    fn test_no_openings_asks_for_another_date_then_transfers() {
        let state = test_state();
        let tenant = tenant();
        let dialogue = Dialogue::new(&state, &tenant);
        let mut ctx = DialogueContext::new(&tenant, "15550001111", "CA1");
        ctx.date = Some(chrono::NaiveDate::from_ymd_opt(2030, 3, 9).unwrap());

        let resp = dialogue.enter(&mut ctx, Step::OfferSlots, VoiceResponse::new());
        assert!(resp.spoken_text().iter().any(|t| t.contains("no openings")));
        let mut ctx = next_ctx(&resp);
        assert_eq!(ctx.step, Step::CollectDate);

        let resp = dialogue.enter(&mut ctx, Step::OfferSlots, VoiceResponse::new());
        assert!(dialed(&resp).is_some());
    }

    #[tokio::test]
    async fn test_unanswered_transfer_goes_to_voicemail() {
        let state = test_state();
        let tenant = tenant();
        let dialogue = Dialogue::new(&state, &tenant);
        let mut ctx = DialogueContext::new(&tenant, "15550001111", "CA1");
        ctx.step = Step::TransferToSpecialist;
        let input = TurnInput {
            dial_status: Some("no-answer".into()),
            ..TurnInput::default()
        };
        let resp = dialogue.turn(ctx, &input).await;
        assert!(records(&resp));
        assert_eq!(next_ctx(&resp).step, Step::Voicemail);
    }

    #[tokio::test]
    async fn test_recording_then_transcription_updates_summary() {
        let state = test_state();
        let tenant = tenant();
        let dialogue = Dialogue::new(&state, &tenant);
        let mut ctx = DialogueContext::new(&tenant, "15550001111", "CA1");
        ctx.step = Step::Voicemail;
        let input = TurnInput {
            recording_url: Some("https://media.example/RE1".into()),
            recording_sid: Some("RE1".into()),
            ..TurnInput::default()
        };
        let resp = dialogue.turn(ctx.clone(), &input).await;
        assert!(matches!(resp.verbs.last(), Some(Verb::Hangup)));

        record_transcription(&state, &ctx, "RE1", "please call me back").await.unwrap();
        let conn = db::lock(&state.db).unwrap();
        let messages = queries::list_messages(&conn, tenant.id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].summary, "summary: please call me back");
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("My name is Ana Lopez."), "Ana Lopez");
        assert_eq!(clean_name("me llamo José"), "José");
        assert_eq!(clean_name("  Bob  "), "Bob");
    }
}
