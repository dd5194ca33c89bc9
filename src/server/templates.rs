pub fn city_lens_logo() -> &'static str {
    r##"<a href="/" class="logo" aria-label="CityLens">
            <svg width="32" height="32" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round" aria-hidden="true">
                <path d="M14.5 4h-5L7 7H4a2 2 0 0 0-2 2v9a2 2 0 0 0 2 2h16a2 2 0 0 0 2-2V9a2 2 0 0 0-2-2h-3l-2.5-3z"/>
                <circle cx="12" cy="13" r="3"/>
                <line x1="7" y1="13" x2="17" y2="13" opacity="0.75"/>
            </svg>
            <span>CityLens</span>
        </a>"##
}

pub fn base_template(title: &str, content: &str, year: i32) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
</head>
<body>
    <header id="main-header">
        {logo}
    </header>
    <main>
        {content}
    </main>
    <footer>
        <p>&copy; {year} CityLens. Help make your city better.</p>
    </footer>
    <script>{script}</script>
</body>
</html>"#,
        title = title,
        logo = city_lens_logo(),
        content = content,
        year = year,
        script = APP_SCRIPT,
    )
}

pub fn index_page(year: i32) -> String {
    base_template("CityLens", REPORT_CARD, year)
}

const REPORT_CARD: &str = r#"<section id="upload-card">
            <h2>Report Urban Issue</h2>
            <p>Capture or upload an image of an urban issue, and AI will help describe it.</p>
            <label for="dropzone-file" id="dropzone">
                <p><strong>Click to upload</strong> or drag and drop</p>
                <p><small>PNG, JPG, GIF (MAX. 10MB)</small></p>
                <input id="dropzone-file" type="file" accept="image/*" hidden>
            </label>
            <img id="preview" alt="Preview" hidden>
            <button id="analyze" type="button" hidden>Analyze Image with AI</button>
        </section>
        <div id="analysis-error" role="alert" hidden></div>
        <section id="report-card" hidden>
            <h2>Confirm Report Details</h2>
            <p>Verify the AI-generated description, add location, contact information, and select recipients.</p>
            <form id="report-form" novalidate>
                <label>Issue Description (AI Generated)
                    <textarea name="description" rows="5" placeholder="AI-generated description of the issue..."></textarea>
                </label>
                <small class="field-error" data-field="description"></small>
                <label>Photo Location
                    <input name="location" placeholder="e.g., Main St &amp; Park Ave, or Lat, Long">
                </label>
                <button id="locate" type="button" aria-label="Get current location">Use my location</button>
                <small class="field-error" data-field="location"></small>
                <label>Your Email (Optional)
                    <input name="email" type="email" placeholder="you@example.com">
                </label>
                <small class="field-error" data-field="email"></small>
                <label>Additional Comments (Optional)
                    <textarea name="comments" placeholder="Any other details you'd like to add?"></textarea>
                </label>
                <fieldset>
                    <legend>Select Report Recipients *</legend>
                    <label><input type="checkbox" name="sendToLocalPolice"> Local Police</label>
                    <label><input type="checkbox" name="sendToCityHall"> City Hall</label>
                    <small class="field-error" data-field="sendToLocalPolice"></small>
                </fieldset>
                <button id="submit" type="submit">Send Report</button>
            </form>
        </section>
        <section id="success-card" hidden>
            <h2>Report Sent Successfully!</h2>
            <p>Thank you for your contribution to improving our city. Your report has been recorded.</p>
            <button id="reset" type="button">Submit Another Report</button>
        </section>
        <ul id="notices" aria-live="polite"></ul>"#;

const APP_SCRIPT: &str = r#"
(function () {
    let sessionId = null;
    const $ = (id) => document.getElementById(id);
    const form = $('report-form');

    async function call(method, path, body, isJson = true) {
        const init = { method, headers: {} };
        if (body !== undefined) {
            if (isJson) {
                init.headers['Content-Type'] = 'application/json';
                init.body = JSON.stringify(body);
            } else {
                init.body = body;
            }
        }
        const response = await fetch(path, init);
        if (response.status === 204) return null;
        const json = await response.json();
        if (json.sessionId) {
            render(json);
        } else if (json.notice) {
            showNotice(json.notice);
        } else if (json.error && response.status !== 409) {
            showNotice({ title: 'Error', description: json.error, variant: 'destructive' });
        }
        return json;
    }

    function showNotice(notice) {
        const item = document.createElement('li');
        item.className = notice.variant;
        item.textContent = notice.title + ': ' + notice.description;
        $('notices').appendChild(item);
        setTimeout(() => item.remove(), 5000);
    }

    function render(view) {
        const preview = $('preview');
        if (view.preview) {
            preview.src = view.preview.dataUri;
            preview.hidden = false;
        } else {
            preview.hidden = true;
            preview.removeAttribute('src');
        }
        const formVisible = view.phase === 'reportFormVisible' || view.phase === 'submitting';
        $('analyze').hidden = !view.canAnalyze && !view.isAnalyzing;
        $('analyze').disabled = view.isAnalyzing;
        $('analyze').textContent = view.isAnalyzing ? 'Analyzing Image...' : 'Analyze Image with AI';
        $('analysis-error').hidden = !view.analysisError || formVisible;
        $('analysis-error').textContent = view.analysisError || '';
        $('report-card').hidden = !formVisible;
        $('success-card').hidden = !view.submitSuccess;
        $('upload-card').hidden = view.submitSuccess;
        $('locate').disabled = view.isLocating;
        $('submit').disabled = view.isSubmitting;
        $('submit').textContent = view.isSubmitting ? 'Sending Report...' : 'Send Report';

        for (const [name, value] of Object.entries(view.values)) {
            const input = form.elements[name];
            if (!input || document.activeElement === input) continue;
            if (input.type === 'checkbox') input.checked = value;
            else input.value = value;
        }
        for (const slot of document.querySelectorAll('.field-error')) {
            const error = view.fieldErrors[slot.dataset.field];
            slot.textContent = error ? error.message : '';
        }
        (view.notices || []).forEach(showNotice);
    }

    function setBusy(button, label) {
        button.disabled = true;
        button.textContent = label;
    }

    function patchFrom(input) {
        const patch = {};
        patch[input.name] = input.type === 'checkbox' ? input.checked : input.value;
        return patch;
    }

    async function upload(file, source) {
        if (!file) return;
        const body = new FormData();
        body.append('file', file);
        await call('POST', '/api/sessions/' + sessionId + '/image?source=' + source, body, false);
    }

    function locate() {
        const path = '/api/sessions/' + sessionId + '/location';
        if (!navigator.geolocation) {
            call('POST', path, { error: 'unsupported' });
            return;
        }
        const codes = { 1: 'permission_denied', 2: 'position_unavailable', 3: 'timeout' };
        navigator.geolocation.getCurrentPosition(
            (pos) => call('POST', path, { latitude: pos.coords.latitude, longitude: pos.coords.longitude }),
            (err) => call('POST', path, { error: codes[err.code] || 'position_unavailable' }),
            { timeout: 10000 }
        );
    }

    $('dropzone-file').addEventListener('change', (event) => upload(event.target.files[0], 'browse'));
    $('upload-card').addEventListener('dragover', (event) => event.preventDefault());
    $('upload-card').addEventListener('drop', (event) => {
        event.preventDefault();
        upload(event.dataTransfer.files[0], 'drop');
    });
    $('analyze').addEventListener('click', () => {
        setBusy($('analyze'), 'Analyzing Image...');
        call('POST', '/api/sessions/' + sessionId + '/analyze');
    });
    $('locate').addEventListener('click', locate);
    form.addEventListener('change', (event) => {
        if (event.target.name) call('PATCH', '/api/sessions/' + sessionId + '/fields', patchFrom(event.target));
    });
    form.addEventListener('submit', async (event) => {
        event.preventDefault();
        if ($('submit').disabled) return;
        setBusy($('submit'), 'Sending Report...');
        const patch = {};
        for (const input of form.elements) {
            if (input.name) Object.assign(patch, patchFrom(input));
        }
        await call('PATCH', '/api/sessions/' + sessionId + '/fields', patch);
        setBusy($('submit'), 'Sending Report...');
        await call('POST', '/api/sessions/' + sessionId + '/submit');
    });
    $('reset').addEventListener('click', () => call('POST', '/api/sessions/' + sessionId + '/reset'));

    call('POST', '/api/sessions').then((view) => { sessionId = view.sessionId; });
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_page_has_shell_parts() {
        let html = index_page(2026);
        assert!(html.contains("<span>CityLens</span>"));
        assert!(html.contains("&copy; 2026 CityLens. Help make your city better."));
        assert!(html.contains("id=\"dropzone-file\""));
        assert!(html.contains("/api/sessions"));
    }

    #[test]
    fn buttons_disable_before_the_request_goes_out() {
        let analyze = APP_SCRIPT
            .find("setBusy($('analyze'), 'Analyzing Image...');")
            .unwrap();
        let analyze_call = APP_SCRIPT.find("sessionId + '/analyze'").unwrap();
        assert!(analyze < analyze_call);

        let submit = APP_SCRIPT
            .find("setBusy($('submit'), 'Sending Report...');")
            .unwrap();
        let patch_call = APP_SCRIPT.find("await call('PATCH'").unwrap();
        let submit_call = APP_SCRIPT.find("sessionId + '/submit'").unwrap();
        let resubmit = APP_SCRIPT[patch_call..]
            .find("setBusy($('submit')")
            .map(|offset| patch_call + offset)
            .unwrap();
        assert!(submit < patch_call);
        assert!(patch_call < resubmit && resubmit < submit_call);
    }
}
