/// Always the first block of a report, before any narrative. The HTML comment
/// carries the form to switch to once a person has reviewed the report.
pub const DISCLAIMER: &str = "\
::: {.callout-warning}
## Generated report
This report was generated by an AI assistant and has not been reviewed by a human. \
Check the code and its results before relying on them.
:::

<!--
Reviewed form (replace the callout above once the report has been checked):

::: {.callout-note}
## Reviewed report
This report was generated by an AI assistant and reviewed by NAME on DATE.
:::
-->";

/// Strip a leading disclaimer so parsing and rendering never duplicate it.
pub(crate) fn strip(text: &str) -> &str {
    let trimmed = text.trim_start_matches(['\n', '\r']);
    match trimmed.strip_prefix(DISCLAIMER) {
        Some(rest) => rest,
        None => text,
    }
}
