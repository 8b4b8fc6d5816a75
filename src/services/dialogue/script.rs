//! Everything the agent says, indexed by language. Templates use `{name}`
//! placeholders filled by [`fill`].

use chrono::{Datelike, NaiveDate, NaiveTime};

use crate::models::Language;

pub struct Script {
    pub language: Language,
    pub language_option: &'static str,
    pub greeting: &'static str,
    pub how_can_help: &'static str,
    pub ivr_booking: &'static str,
    pub ivr_department: &'static str,
    pub ivr_voicemail: &'static str,
    pub not_understood: &'static str,
    pub ask_name: &'static str,
    pub ask_phone: &'static str,
    pub ask_date: &'static str,
    pub no_openings: &'static str,
    pub offer_intro: &'static str,
    pub offer_option: &'static str,
    pub offer_more: &'static str,
    pub offer_specialist: &'static str,
    pub slot_taken: &'static str,
    pub booked: &'static str,
    pub booking_failed: &'static str,
    pub sms_confirmation: &'static str,
    pub transferring: &'static str,
    pub no_answer: &'static str,
    pub voicemail_prompt: &'static str,
    pub voicemail_saved: &'static str,
    pub unavailable: &'static str,
    pub forwarding: &'static str,
    pub goodbye: &'static str,
    pub not_in_service: &'static str,
    pub technical_difficulty: &'static str,
    pub session_expired: &'static str,
    pub weekdays: [&'static str; 7],
    pub months: [&'static str; 12],
}

static ENGLISH: Script = Script {
    language: Language::En,
    language_option: "For English, press {digit}.",
    greeting: "Thank you for calling {business}.",
    how_can_help: "How can I help you today? You can say book an appointment, pricing, leave a message, or speak to someone.",
    ivr_booking: "To book an appointment, press 1.",
    ivr_department: "For {department}, press {digit}.",
    ivr_voicemail: "To leave a message, press 9.",
    not_understood: "Sorry, I didn't catch that.",
    ask_name: "Great, I can help with that. What is your full name?",
    ask_phone: "Thanks, {name}. What is the best phone number to reach you? You can say it or enter it on your keypad.",
    ask_date: "What day would you like to come in? You can say today, tomorrow, or a day like Friday.",
    no_openings: "Sorry, we have no openings on {date}. What other day works for you?",
    offer_intro: "Here are the openings on {date}.",
    offer_option: "For {time}, press {digit}.",
    offer_more: "To hear more times, press 4.",
    offer_specialist: "To speak with a specialist, press 0.",
    slot_taken: "Sorry, that time was just taken.",
    booked: "You're all set for {date} at {time}. Your confirmation code is {code}. Thank you for calling {business}. Goodbye!",
    booking_failed: "Sorry, we couldn't complete your booking right now. Please call back later. Goodbye.",
    sms_confirmation: "{business}: your appointment is confirmed for {date} at {time}. Confirmation code {code}.",
    transferring: "Please hold while I transfer your call.",
    no_answer: "Sorry, no one is available to take your call right now.",
    voicemail_prompt: "Please leave your name, number and message after the tone. Hang up when you are finished.",
    voicemail_saved: "Thank you. Your message has been recorded and we will call you back soon. Goodbye.",
    unavailable: "We are temporarily unavailable. Please leave a message after the tone.",
    forwarding: "Please hold while we connect your call.",
    goodbye: "Thank you for calling. Goodbye.",
    not_in_service: "Sorry, the number you have called is not in service. Goodbye.",
    technical_difficulty: "We're sorry, we are having technical difficulties. Please try again later. Goodbye.",
    session_expired: "Sorry, we lost track of your call. Please call us back. Goodbye.",
    weekdays: ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"],
    months: [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ],
};

static SPANISH: Script = Script {
    language: Language::Es,
    language_option: "Para español, oprima {digit}.",
    greeting: "Gracias por llamar a {business}.",
    how_can_help: "¿En qué le puedo ayudar hoy? Puede decir agendar una cita, precios, dejar un mensaje o hablar con alguien.",
    ivr_booking: "Para agendar una cita, oprima 1.",
    ivr_department: "Para {department}, oprima {digit}.",
    ivr_voicemail: "Para dejar un mensaje, oprima 9.",
    not_understood: "Disculpe, no le entendí.",
    ask_name: "Con gusto le ayudo. ¿Cuál es su nombre completo?",
    ask_phone: "Gracias, {name}. ¿A qué número de teléfono le podemos contactar? Puede decirlo o marcarlo en su teclado.",
    ask_date: "¿Qué día le gustaría venir? Puede decir hoy, mañana o un día como el viernes.",
    no_openings: "Lo siento, no tenemos horarios disponibles el {date}. ¿Qué otro día le funciona?",
    offer_intro: "Estos son los horarios disponibles el {date}.",
    offer_option: "Para las {time}, oprima {digit}.",
    offer_more: "Para escuchar más horarios, oprima 4.",
    offer_specialist: "Para hablar con un especialista, oprima 0.",
    slot_taken: "Lo siento, ese horario acaba de ser reservado.",
    booked: "Listo, su cita quedó para el {date} a las {time}. Su código de confirmación es {code}. Gracias por llamar a {business}. ¡Adiós!",
    booking_failed: "Lo siento, no pudimos completar su cita en este momento. Por favor llame más tarde. Adiós.",
    sms_confirmation: "{business}: su cita está confirmada para el {date} a las {time}. Código de confirmación {code}.",
    transferring: "Por favor espere mientras transfiero su llamada.",
    no_answer: "Lo siento, nadie está disponible para atender su llamada en este momento.",
    voicemail_prompt: "Por favor deje su nombre, número y mensaje después del tono. Cuelgue cuando termine.",
    voicemail_saved: "Gracias. Su mensaje ha sido grabado y le llamaremos pronto. Adiós.",
    unavailable: "En este momento no estamos disponibles. Por favor deje un mensaje después del tono.",
    forwarding: "Por favor espere mientras conectamos su llamada.",
    goodbye: "Gracias por llamar. Adiós.",
    not_in_service: "Lo siento, el número que marcó no está en servicio. Adiós.",
    technical_difficulty: "Lo sentimos, tenemos problemas técnicos. Por favor intente más tarde. Adiós.",
    session_expired: "Disculpe, perdimos el hilo de su llamada. Por favor vuelva a llamarnos. Adiós.",
    weekdays: ["lunes", "martes", "miércoles", "jueves", "viernes", "sábado", "domingo"],
    months: [
        "enero", "febrero", "marzo", "abril", "mayo", "junio", "julio", "agosto", "septiembre",
        "octubre", "noviembre", "diciembre",
    ],
};

pub fn script(language: Language) -> &'static Script {
    match language {
        Language::En => &ENGLISH,
        Language::Es => &SPANISH,
    }
}

/// Replaces each `{key}` in `template` with its value.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

impl Script {
    pub fn say_date(&self, date: NaiveDate) -> String {
        let weekday = self.weekdays[date.weekday().num_days_from_monday() as usize];
        let month = self.months[date.month0() as usize];
        match self.language {
            Language::En => format!("{weekday}, {month} {}", date.day()),
            Language::Es => format!("{weekday} {} de {month}", date.day()),
        }
    }

    pub fn say_time(&self, time: NaiveTime) -> String {
        match self.language {
            Language::En => time.format("%-I:%M %p").to_string(),
            Language::Es => time.format("%-H:%M").to_string(),
        }
    }
}

/// Spaces out a confirmation code so it is read character by character.
pub fn spell(code: &str) -> String {
    code.chars()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_placeholders() {
        let s = fill(script(Language::En).greeting, &[("business", "Acme")]);
        assert_eq!(s, "Thank you for calling Acme.");
        let s = fill(script(Language::Es).offer_option, &[("time", "9:30"), ("digit", "2")]);
        assert_eq!(s, "Para las 9:30, oprima 2.");
    }

    #[test]
    fn test_say_date_and_time() {
        let date = NaiveDate::from_ymd_opt(2030, 3, 4).unwrap();
        assert_eq!(script(Language::En).say_date(date), "Monday, March 4");
        assert_eq!(script(Language::Es).say_date(date), "lunes 4 de marzo");

        let time = NaiveTime::from_hms_opt(14, 30, 0).unwrap();
        assert_eq!(script(Language::En).say_time(time), "2:30 PM");
        assert_eq!(script(Language::Es).say_time(time), "14:30");
    }

    #[test]
    fn test_spell() {
        assert_eq!(spell("AB3"), "A, B, 3");
    }
}
