//! Fixed rating rubric shared by the prompt builder, the response validator
//! and the CSV schema. Changing a label or the count invalidates all three.

/// Number of attributes every frame is rated on.
pub const FEATURE_COUNT: usize = 138;

/// Rubric labels in prompt order.
pub const RUBRIC: [&str; FEATURE_COUNT] = [
    "Dominant",
    "Unpleasant",
    "Trustworthy",
    "Warm",
    "Competent",
    "Agentic",
    "Experienced",
    "Open",
    "Conscientious",
    "Neurotic",
    "Extravert",
    "Kind",
    "Honest",
    "Creative",
    "Lazy",
    "Loyal",
    "Stubborn",
    "Shy",
    "Intelligent",
    "Socially competent",
    "Brave",
    "Selfish",
    "Successful",
    "Ambitious",
    "Impulsive",
    "Punctual",
    "Immoral",
    "Submissive",
    "Pleasant",
    "Introvert",
    "Agreeable",
    "Nude",
    "Old",
    "Attractive",
    "Masculine",
    "Feminine",
    "In poor somatic health",
    "In poor mental health",
    "Alone",
    "Eating / drinking",
    "Sweating / feeling hot",
    "Coughing / sneezing",
    "Vomiting / urinating / defecating",
    "Feeling ill",
    "Feeling nauseous / dizzy",
    "Feeling energetic",
    "Feeling tired",
    "Moving their body",
    "Moving their leg / foot",
    "Moving their arm / hand",
    "Moving their head",
    "Making facial expressions",
    "Moving reflexively",
    "Jumping",
    "Sitting",
    "Standing",
    "Laying down",
    "Moving rapidly",
    "Moving towards someone",
    "Moving away from someone",
    "Panting / short of breath",
    "Smelling something",
    "Feeling pain",
    "Listening to something",
    "Tasting something",
    "Looking at something",
    "Feeling touch",
    "Blinking",
    "Hungry / thirsty",
    "Moaning / groaning",
    "Yelling",
    "Touching someone",
    "Crying",
    "Making gaze contact",
    "Hitting / hurting someone",
    "Laughing",
    "Talking",
    "Kissing / hugging / cuddling",
    "Whispering",
    "Communicating nonverbally",
    "Attending someone",
    "Ignoring someone",
    "Gesturing",
    "Showing affection",
    "Being morally righteous",
    "Thinking / reasoning",
    "Empathizing",
    "Feeling secure",
    "Feeling confident",
    "Daydreaming",
    "Wanting something",
    "Feeling satisfied",
    "Feeling calm",
    "Exerting self-control",
    "Feeling displeasure",
    "Experiencing failure",
    "Making a decision",
    "Pursuing a goal",
    "Feeling lonely",
    "Feeling moved",
    "Exerting mental effort",
    "Sexually aroused",
    "Focusing attention",
    "Experiencing success",
    "Feeling insecure",
    "Feeling pleasure",
    "Feeling disappointed",
    "Feeling agitated",
    "Motivated",
    "Physically aggressive",
    "Intimate",
    "Informal",
    "Romantic",
    "Compliant",
    "Interacting positively",
    "Joking",
    "Authoritarian",
    "Acting reluctantly",
    "Hostile",
    "Cooperative",
    "Flirtatious",
    "Harassing someone",
    "Interacting physically",
    "Emotionally aroused",
    "Verbally aggressive",
    "Equal",
    "Affectionate",
    "Serious",
    "Playful",
    "Superficial",
    "Interacting negatively",
    "Formal",
    "Having a conflict",
    "Sexual",
    "Acting voluntarily",
    "Interacting emotionally",
    "Making fun of someone",
    "Inequal",
];

const PROMPT_HEADER: &str = "\
The following input includes an image (a single frame from a video) and transcriptions of the audio extracted from the same video.
Consider both the visual and the auditory information and give one integrated response.

Evaluate the contents of this frame by examining the presence of each of the 138 features listed below.
Quantify the presence of every feature on a scale from 0 to 100, where 0 means complete absence and 100 means maximum presence.

INSTRUCTIONS:
1. Rate ALL 138 features, without exception
2. Replace EVERY question mark with a number between 0 and 100
3. Do NOT skip any feature
4. Do NOT add explanations, preambles or any other text
5. Respond with EXACTLY 138 lines in the format \"Feature: Number\"
6. If unsure about a feature, give your best estimate and never leave it unrated

List of Features:
";

/// Build the instructional prompt enumerating every rubric label as `Label:?`.
pub fn build_prompt() -> String {
    let mut prompt = String::with_capacity(PROMPT_HEADER.len() + FEATURE_COUNT * 24);
    prompt.push_str(PROMPT_HEADER);
    for label in RUBRIC.iter() {
        prompt.push_str(label);
        prompt.push_str(":?\n");
    }
    prompt
}

/// Index of a label in the rubric, if it is one.
pub fn position(label: &str) -> Option<usize> {
    RUBRIC.iter().position(|l| *l == label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_rubric_labels_are_unique() {
        let unique: HashSet<&str> = RUBRIC.iter().copied().collect();
        assert_eq!(unique.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_labels_contain_no_colon() {
        assert!(RUBRIC.iter().all(|l| !l.contains(':') && !l.trim().is_empty()));
    }

    #[test]
    fn test_prompt_lists_every_label() {
        let prompt = build_prompt();
        let listed = prompt.lines().filter(|l| l.ends_with(":?")).count();
        assert_eq!(listed, FEATURE_COUNT);
        assert!(prompt.contains("Socially competent:?"));
        assert!(prompt.ends_with("Inequal:?\n"));
    }

    #[test]
    fn test_position() {
        assert_eq!(position("Dominant"), Some(0));
        assert_eq!(position("Inequal"), Some(FEATURE_COUNT - 1));
        assert_eq!(position("Unknown"), None);
    }
}
