/// Words and separators a prompt needs to render choices and yes/no
/// questions in one culture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptCultureModel {
    pub locale: &'static str,
    pub separator: &'static str,
    pub inline_or: &'static str,
    pub inline_or_more: &'static str,
    pub yes_in_language: &'static str,
    pub no_in_language: &'static str,
}

macro_rules! culture {
    ($locale:literal, $sep:literal, $or:literal, $or_more:literal, $yes:literal, $no:literal) => {
        PromptCultureModel {
            locale: $locale,
            separator: $sep,
            inline_or: $or,
            inline_or_more: $or_more,
            yes_in_language: $yes,
            no_in_language: $no,
        }
    };
}

pub const ENGLISH_CULTURE: &str = "en-us";

pub const ENGLISH: PromptCultureModel = culture!("en-us", ", ", " or ", ", or ", "Yes", "No");

const CULTURES: &[PromptCultureModel] = &[
    culture!("bg-bg", ", ", " или ", ", или ", "да", "Не"),
    culture!("zh-cn", "， ", " 要么 ", "， 要么 ", "是的", "不"),
    culture!("nl-nl", ", ", " of ", ", of ", "Ja", "Nee"),
    ENGLISH,
    culture!("fr-fr", ", ", " ou ", ", ou ", "Oui", "Non"),
    culture!("de-de", ", ", " oder ", ", oder ", "Ja", "Nein"),
    culture!("hi-in", ", ", " या ", ", या ", "हां", "नहीं"),
    culture!("it-it", ", ", " o ", " o ", "Si", "No"),
    culture!("ja-jp", "、 ", " または ", "、 または ", "はい", "いいえ"),
    culture!("ko-kr", ", ", " 또는 ", " 또는 ", "예", "아니"),
    culture!("pt-br", ", ", " ou ", ", ou ", "Sim", "Não"),
    culture!("es-es", ", ", " o ", ", o ", "Sí", "No"),
    culture!("sv-se", ", ", " eller ", " eller ", "Ja", "Nej"),
    culture!("tr-tr", ", ", " veya ", " veya ", "Evet", "Hayır"),
];

pub struct PromptCultureModels;

impl PromptCultureModels {
    pub fn supported_cultures() -> &'static [PromptCultureModel] {
        CULTURES
    }

    /// Normalizes a locale such as `en-US` or `es-MX` to the closest
    /// supported culture. Unknown languages come back lower-cased.
    pub fn map_to_nearest_language(culture_code: &str) -> String {
        let code = culture_code.to_lowercase();
        if CULTURES.iter().any(|c| c.locale == code) {
            return code;
        }
        let language = code.split('-').next().unwrap_or_default();
        CULTURES
            .iter()
            .find(|c| !language.is_empty() && c.locale.split('-').next() == Some(language))
            .map(|c| c.locale.to_string())
            .unwrap_or(code)
    }

    /// Model for the nearest supported culture, if any.
    pub fn get(culture_code: &str) -> Option<&'static PromptCultureModel> {
        let nearest = Self::map_to_nearest_language(culture_code);
        CULTURES.iter().find(|c| c.locale == nearest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_regional_variants_to_supported_cultures() {
        assert_eq!(PromptCultureModels::map_to_nearest_language("en-GB"), "en-us");
        assert_eq!(PromptCultureModels::map_to_nearest_language("es-MX"), "es-es");
        assert_eq!(PromptCultureModels::map_to_nearest_language("FR-fr"), "fr-fr");
        assert_eq!(PromptCultureModels::map_to_nearest_language("xx-yy"), "xx-yy");
    }

    #[test]
    fn fourteen_cultures_are_available() {
        assert_eq!(PromptCultureModels::supported_cultures().len(), 14);
        let german = PromptCultureModels::get("de").unwrap();
        assert_eq!(german.inline_or, " oder ");
        assert_eq!(german.no_in_language, "Nein");
    }
}
