//! Differential-diagnosis prompts sent with every case.
//!
//! The prompt is fixed per provider so that repeated samples differ only by
//! temperature and model randomness. The Gemini variant adds explicit
//! English-output demands; without them Gemini answers in the language of
//! the case report.

use crate::pipeline::classify::Provider;

const QUIZ_PREAMBLE: &str = "You are tasked with solving a quiz on a special medical case involving a complex and rare disease. \
Your challenge is to use the patient's provided medical history and imaging data to identify possible diagnostic candidates. \
Your goal is to perform a differential diagnosis.\
Here are the hints for the imaging data:

Original text and image included in the page image (page_xx.png)
Additional enlarged image versions (page_xx_image_xx.jpeg)
Consider the Figure Legends corresponding to each image thoughtfully, as they pertain to the specific page.
Quiz:
Based on this information, present three possible disease candidates. Keep in mind that the correct answer may be a unique or rare disease.";

const OUTPUT_INSTRUCTIONS: &str = "Output: For each disease candidate, provide the following information:
1. Names of three possible disease candidates.
2. A likelihood score for each candidate, considering whether it's a rare or unique case (on a scale of 1-10).
3. Detailed reasons for considering each disease as a potential diagnosis.";

const OUTPUT_INSTRUCTIONS_ENGLISH: &str = "Output: MUST In English, for each disease candidate, provide the following information:
1. Names of three possible disease candidates in English.
2. A likelihood score for each candidate, considering whether it's a rare or unique case (on a scale of 1-10).
3. Detailed reasons for considering each disease as a potential diagnosis in English.";

/// Build the quiz prompt, embedding the extracted texts verbatim.
pub fn differential_diagnosis_prompt(provider: Provider, history: &str, figure_legends: &str) -> String {
    match provider {
        Provider::OpenAi => format!(
            "{QUIZ_PREAMBLE}\n\nHistory:{history}\nFigure Legends:{figure_legends}\n\n{OUTPUT_INSTRUCTIONS}\n"
        ),
        Provider::Gemini => format!(
            "{QUIZ_PREAMBLE}\nIn English for clear.\n\nHistory:\n{history}\nFigure Legends:\n{figure_legends}\n\n{OUTPUT_INSTRUCTIONS_ENGLISH}\n"
        ),
    }
}
