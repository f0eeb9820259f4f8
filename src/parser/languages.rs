use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

/// Ordered language detection table. Multiple languages may coexist on one
/// release; an empty match set defaults to `["en"]`.
static LANGUAGE_TABLE: &[(&str, &str)] = &[
    ("fr", r"\b(?:FR(?:ench|a|e|anc[eê]s)?|V(?:O?F(?:F|I|i)?|O?Q)|TRUEFRENCH|VOST(?:FR)?|SUBFRENCH)\b"),
    ("en", r"\b(?:EN(?:G(?:LISH)?)?|VOST(?:EN)?|SUBBED)\b"),
    ("es", r"\b(?:ES(?:P(?:ANISH)?)?|VOSE|SUBESP)\b"),
    ("de", r"\b(?:DE(?:UTSCH|RMAN)?|GER(?:MAN)?|SUBGER)\b"),
    ("it", r"\b(?:IT(?:A(?:LIAN)?)?|SUBITA)\b"),
    ("pt", r"\b(?:PT(?:-BR)?|POR(?:TUGUESE)?|LEGENDADO)\b"),
    ("ru", r"\b(?:RU(?:S(?:SIAN)?)?|SUBSRUS)\b"),
    ("nl", r"\b(?:NL(?:D)?|DUTCH|SUBSNL)\b"),
    ("hu", r"\b(?:HU(?:N(?:GARIAN)?)?|SUBHUN)\b"),
    ("la", r"\b(?:LA(?:TIN(?:O)?)?)\b"),
    ("in", r"\b(?:INDIAN|HINDI|TELUGU|TAMIL|KANNADA|MALAYALAM|PUNJABI|MARATHI|BENGALI|GUJARATI|URDU)\b"),
    ("multi", r"\b(?:MULTI(?:LANG(?:UE)?)?|DUAL(?:AUDIO)?|VF2)\b"),
];

static LANGUAGE_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    LANGUAGE_TABLE
        .iter()
        .map(|(lang, pattern)| {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("language pattern compiles");
            (*lang, regex)
        })
        .collect()
});

pub fn detect_languages(raw_title: &str) -> Vec<String> {
    let mut languages: Vec<String> = LANGUAGE_REGEXES
        .iter()
        .filter(|(_, regex)| regex.is_match(raw_title))
        .map(|(lang, _)| lang.to_string())
        .collect();
    if languages.is_empty() {
        languages.push("en".to_string());
    }
    languages
}

/// French dub sub-types, evaluated in order with the broad `FRENCH` match
/// last. Only meaningful when the release carries `fr` or `multi`.
static FRENCH_TABLE: &[(&str, &str)] = &[
    ("VFF", r"\b(?:VFF|TRUEFRENCH)\b"),
    ("VF2", r"\b(?:VF2)\b"),
    ("VFQ", r"\b(?:VFQ)\b"),
    ("VFI", r"\b(?:VFI)\b"),
    ("VOF", r"\b(?:VOF)\b"),
    ("VOQ", r"\b(?:VOQ|VQ)\b"),
    ("VOSTFR", r"\b(?:VOSTFR|SUBFRENCH)\b"),
    ("FRENCH", r"\b(?:FRENCH|FR)\b"),
];

static FRENCH_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    FRENCH_TABLE
        .iter()
        .map(|(tag, pattern)| {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("french pattern compiles");
            (*tag, regex)
        })
        .collect()
});

pub fn detect_french_dub(raw_title: &str, languages: &[String]) -> Option<&'static str> {
    if !languages.iter().any(|l| l == "fr" || l == "multi") {
        return None;
    }
    FRENCH_REGEXES
        .iter()
        .find(|(_, regex)| regex.is_match(raw_title))
        .map(|(tag, _)| *tag)
}

/// Known French scene release groups. Matched with explicit separator
/// boundaries because group names show up glued between dots and dashes.
static FR_RELEASE_GROUPS: &[&str] = &[
    "BlackAngel", "Choco", "Sicario", "Tezcat74", "TyrellCorp", "Zapax",
    "FtLi", "Goldenyann", "MUSTANG", "Obi", "PEPiTE", "QUEBEC63", "QC63", "ROMKENT", "R3MiX",
    "FLOP", "FRATERNiTY", "QTZ", "PopHD", "toto70300", "GHT", "EXTREME", "AvALoN", "KFL", "mHDgz",
    "DUSTiN", "QUALiTY", "Tsundere-Raws", "LAZARUS", "ALFA", "SODAPOP", "Tetine", "DREAM", "Winks",
    "BDHD", "MAX", "SowHD", "SN2P", "RG", "BTT", "KAF", "AwA", "MULTiViSiON", "FERVEX", "Foxhound", "K7",
    "FUJiSAN", "HDForever", "MARBLECAKE", "MYSTERiON", "ONLY", "UTT", "ZiT", "JP48", "SEL", "PATOMiEL",
    "BONBON", "FCK", "FW", "FoX", "FrIeNdS", "MOONLY", "MTDK", "PATOPESTO", "Psaro", "T3KASHi", "TFA",
    "ALLDAYiN", "ARK01", "HANAMi", "HeavyWeight", "NEO", "NoNe", "ONLYMOViE", "Slay3R", "TkHD",
    "4FR", "AiR3D", "AiRDOCS", "AiRFORCE", "AiRLiNE", "AiRTV", "AKLHD", "AMB3R", "SERQPH", "Elcrackito",
    "ANMWR", "AVON", "AYMO", "AZR", "BANKAi", "BAWLS", "BiPOLAR", "BLACKPANTERS", "BODIE", "BOOLZ",
    "BRiNK", "CARAPiLS", "CiELOS",
    "CiNEMA", "CMBHD", "CoRa", "COUAC", "CRYPT0", "D4KiD", "DEAL", "DiEBEX", "DUPLI", "DUSS", "ENJOi",
    "EUBDS", "FHD", "FiDELiO", "FiDO", "ForceBleue",
    "FREAMON", "FRENCHDEADPOOL2", "FRiES", "FUTiL", "FWDHD", "GHOULS", "GiMBAP", "GLiMMER", "Goatlove",
    "HERC", "HiggsBoson", "HiRoSHiMa",
    "HYBRiS", "HyDe", "JMT", "JoKeR", "JUSTICELEAGUE", "KAZETV", "L0SERNiGHT", "LaoZi", "LeON",
    "LOFiDEL", "LOST", "LOWIMDB", "LYPSG", "MAGiCAL",
    "MANGACiTY", "MAXAGAZ", "MaxiBeNoul", "McNULTY", "MELBA", "MiND", "MORELAND", "MUNSTER", "MUxHD",
    "NERDHD", "NERO", "NrZ", "NTK", "OBSTACLE",
    "OohLaLa", "OOKAMI", "PANZeR", "PiNKPANTERS", "PKPTRS", "PRiDEHD", "PROPJOE", "PURE",
    "PUREWASTEOFBW", "ROUGH", "RUDE", "Ryotox", "SAFETY",
    "SASHiMi", "SEiGHT", "SESKAPiLE", "SHEEEiT", "SHiNiGAMi", "SHiNiGAMiUHD", "SiGeRiS",
    "SILVIODANTE", "SLEEPINGFOREST", "S4LVE", "SPINE",
    "SPOiLER", "STRINGERBELL", "SUNRiSE", "tFR", "THENiGHTMAREiNHD", "THiNK", "THREESOME", "TiMELiNE",
    "TSuNaMi", "UKDHD", "UKDTV", "ULSHD", "Ulysse",
    "USUNSKiLLED", "URY", "VENUE", "VFC", "VoMiT", "Wednesday29th", "ZEST", "ZiRCON",
];

static FR_GROUP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = FR_RELEASE_GROUPS.join("|");
    Regex::new(&format!(
        r"(?:^|[.\s\-\[])({alternation})(?:[.\s\-\]]|$)"
    ))
    .expect("release group pattern compiles")
});

pub fn is_french_release_group(raw_title: &str) -> bool {
    FR_GROUP_REGEX.is_match(raw_title)
}

pub fn extract_french_release_group(raw_title: &str) -> Option<String> {
    FR_GROUP_REGEX
        .captures(raw_title)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

static HDR_TABLE: &[(&str, &str)] = &[
    ("HDR", r"\bHDR(?:10\+?|10Plus|10p?)?\b"),
    ("DV", r"\b(?:DV|DoVi)\b"),
    ("IMAX", r"\bIMAX\b"),
];

static HDR_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    HDR_TABLE
        .iter()
        .map(|(tag, pattern)| {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("hdr pattern compiles");
            (*tag, regex)
        })
        .collect()
});

pub fn detect_hdr(raw_title: &str) -> Vec<String> {
    HDR_REGEXES
        .iter()
        .filter(|(_, regex)| regex.is_match(raw_title))
        .map(|(tag, _)| tag.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_multiple_languages() {
        let languages = detect_languages("Movie.2020.MULTi.FRENCH.ENGLISH.1080p");
        assert!(languages.contains(&"fr".to_string()));
        assert!(languages.contains(&"en".to_string()));
        assert!(languages.contains(&"multi".to_string()));
    }

    #[test]
    fn defaults_to_english() {
        assert_eq!(detect_languages("Some.Title.1080p.x264"), vec!["en"]);
    }

    #[test]
    fn french_dub_requires_french_language() {
        let languages = vec!["en".to_string()];
        assert_eq!(detect_french_dub("Movie.VFF.1080p", &languages), None);

        let languages = vec!["fr".to_string()];
        assert_eq!(
            detect_french_dub("Movie.TRUEFRENCH.1080p", &languages),
            Some("VFF")
        );
        assert_eq!(
            detect_french_dub("Movie.VOSTFR.1080p", &languages),
            Some("VOSTFR")
        );
    }

    #[test]
    fn recognizes_release_groups_with_boundaries() {
        assert!(is_french_release_group("Film.2023.FRENCH.1080p.WEB.H264-FW"));
        assert!(is_french_release_group("Film.2023.MULTI.2160p-[QTZ]"));
        // Group token glued inside a word is not a hit.
        assert!(!is_french_release_group("Firmware.Update.1080p"));
        assert_eq!(
            extract_french_release_group("Film.2023.FRENCH.1080p.WEB.H264-FW"),
            Some("FW".to_string())
        );
    }

    #[test]
    fn detects_hdr_markers() {
        assert_eq!(detect_hdr("Movie.2160p.HDR10+.DV"), vec!["HDR", "DV"]);
        assert!(detect_hdr("Movie.1080p.x264").is_empty());
    }
}
