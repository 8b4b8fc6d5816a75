//! Keyword classification of caller speech.

use crate::models::{Intent, Language};

/// Words shorter than this must match exactly.
const FUZZY_MIN_LEN: usize = 5;
const FUZZY_MAX_DISTANCE: usize = 2;

/// Lowercases, strips Spanish/English diacritics and replaces punctuation
/// (except `/`) with spaces.
pub fn fold(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            c if c.is_alphanumeric() || c == '/' => c,
            _ => ' ',
        })
        .collect()
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

fn mentions_exact(folded: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        return format!(" {} ", folded.split_whitespace().collect::<Vec<_>>().join(" "))
            .contains(&format!(" {keyword} "));
    }
    folded.split_whitespace().any(|word| word == keyword)
}

fn mentions_fuzzy(folded: &str, keyword: &str) -> bool {
    if keyword.contains(' ') || keyword.chars().count() < FUZZY_MIN_LEN {
        return false;
    }
    folded.split_whitespace().any(|word| {
        word.chars().count() >= FUZZY_MIN_LEN && levenshtein(word, keyword) <= FUZZY_MAX_DISTANCE
    })
}

/// True when the folded text contains `keyword`: as a phrase for multi-word
/// keywords, otherwise as a word, allowing small misspellings of long words.
pub fn mentions(folded: &str, keyword: &str) -> bool {
    let keyword = fold(keyword);
    let keyword = keyword.trim();
    mentions_exact(folded, keyword) || mentions_fuzzy(folded, keyword)
}

pub fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    let folded = fold(text);
    keywords.iter().any(|k| mentions(&folded, k))
}

fn keywords(intent: Intent, language: Language) -> &'static [&'static str] {
    match (intent, language) {
        (Intent::Book, Language::En) => &[
            "appointment", "book", "booking", "schedule", "reserve", "reservation", "available",
            "availability", "come in",
        ],
        (Intent::Book, Language::Es) => &[
            "cita", "agendar", "reservar", "reservacion", "programar", "turno", "disponible",
            "disponibilidad",
        ],
        (Intent::Pricing, Language::En) => &[
            "price", "prices", "pricing", "cost", "costs", "how much", "quote", "estimate", "rates",
        ],
        (Intent::Pricing, Language::Es) => &[
            "precio", "precios", "costo", "cuesta", "cuanto", "cotizacion", "presupuesto", "tarifa",
        ],
        (Intent::Voicemail, Language::En) => &[
            "message", "voicemail", "leave a message", "call me back", "callback",
        ],
        (Intent::Voicemail, Language::Es) => &[
            "mensaje", "recado", "buzon", "dejar un mensaje", "devolver la llamada",
        ],
        (Intent::Support, Language::En) => &[
            "help", "support", "problem", "issue", "question", "speak to someone", "talk to someone",
            "person", "human", "representative", "agent",
        ],
        (Intent::Support, Language::Es) => &[
            "ayuda", "soporte", "problema", "pregunta", "hablar con alguien", "persona", "humano",
            "representante", "agente",
        ],
    }
}

/// First intent, in priority order, whose keywords the text mentions. Exact
/// words win over misspellings of another intent's words.
pub fn classify(text: &str, language: Language) -> Option<Intent> {
    let folded = fold(text);
    let matching = |matches: fn(&str, &str) -> bool| {
        Intent::ORDERED.into_iter().find(|intent| {
            keywords(*intent, language).iter().any(|k| {
                let k = fold(k);
                matches(&folded, k.trim())
            })
        })
    };
    matching(mentions_exact).or_else(|| matching(mentions_fuzzy))
}

pub const MORE_WORDS: &[&str] = &["more", "other", "others", "next", "mas", "otras", "otros", "siguientes"];
pub const SPECIALIST_WORDS: &[&str] = &[
    "specialist", "person", "human", "someone", "agent", "especialista", "persona", "alguien", "agente",
];
pub const ENGLISH_WORDS: &[&str] = &["english", "ingles"];
pub const SPANISH_WORDS: &[&str] = &["spanish", "espanol", "castellano"];

/// Reads a choice spoken as a number or an ordinal ("two", "the second",
/// "segunda", "2"), returning 1-based positions.
pub fn spoken_choice(text: &str) -> Option<usize> {
    let folded = fold(text);
    for word in folded.split_whitespace() {
        let n = match word {
            "0" | "zero" | "cero" => 0,
            "1" | "one" | "first" | "uno" | "una" | "primero" | "primera" | "primer" => 1,
            "2" | "two" | "second" | "dos" | "segundo" | "segunda" => 2,
            "3" | "three" | "third" | "tres" | "tercero" | "tercera" | "tercer" => 3,
            "4" | "four" | "fourth" | "cuatro" | "cuarto" | "cuarta" => 4,
            "5" | "five" | "fifth" | "cinco" | "quinto" | "quinta" => 5,
            "6" | "six" | "sixth" | "seis" | "sexto" | "sexta" => 6,
            "7" | "seven" | "seventh" | "siete" | "septimo" | "septima" => 7,
            "8" | "eight" | "eighth" | "ocho" | "octavo" | "octava" => 8,
            "9" | "nine" | "ninth" | "nueve" | "noveno" | "novena" => 9,
            _ => continue,
        };
        return Some(n);
    }
    None
}
