//! Embedded HTML dashboard for the inspector

pub const INSPECTOR_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Ucanscope Inspector</title>
    <style>
        * { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #fafafa;
            color: #333;
            font-size: 14px;
        }
        header {
            background: #fff;
            border-bottom: 1px solid #e0e0e0;
            padding: 0.75rem 1rem;
            display: flex;
            gap: 1rem;
            align-items: center;
            position: sticky;
            top: 0;
        }
        header h1 { font-size: 1rem; font-weight: 600; }
        header input, header select { padding: 0.25rem 0.5rem; border: 1px solid #ccc; border-radius: 4px; }
        main { display: grid; grid-template-columns: 1fr 1fr; height: calc(100vh - 50px); }
        #list { overflow-y: auto; border-right: 1px solid #e0e0e0; }
        .row { display: grid; grid-template-columns: 4rem 1fr 14rem 5rem; gap: 0.5rem; padding: 0.4rem 1rem; border-bottom: 1px solid #eee; cursor: pointer; }
        .row:hover, .row.selected { background: #eef4ff; }
        .status-success { color: #1a7f37; }
        .status-error { color: #cf222e; }
        .status-pending { color: #9a6700; }
        .url { overflow: hidden; text-overflow: ellipsis; white-space: nowrap; }
        .tag { display: inline-block; padding: 0 0.4rem; margin-left: 0.25rem; border-radius: 8px; color: #fff; font-size: 12px; }
        #detail { overflow: auto; padding: 1rem; }
        #detail pre { font-family: ui-monospace, Menlo, monospace; font-size: 12px; white-space: pre-wrap; }
        .empty { color: #888; padding: 2rem; text-align: center; }
    </style>
</head>
<body>
    <header>
        <h1>Ucanscope</h1>
        <input id="url" placeholder="Filter URL">
        <input id="capability" placeholder="Filter capability">
        <select id="status">
            <option value="all">All</option>
            <option value="pending">Pending</option>
            <option value="success">Success</option>
            <option value="error">Error</option>
        </select>
        <button id="clear">Clear</button>
    </header>
    <main>
        <div id="list"><div class="empty">Waiting for requests...</div></div>
        <div id="detail"><div class="empty">Select a request</div></div>
    </main>
    <script>
        const list = document.getElementById('list');
        const detail = document.getElementById('detail');
        let selected = null;

        function escape(text) {
            const div = document.createElement('div');
            div.textContent = text;
            return div.innerHTML;
        }

        function formatTiming(ms) {
            if (ms === null || ms === undefined) return '-';
            return ms < 1000 ? Math.round(ms) + 'ms' : (ms / 1000).toFixed(2) + 's';
        }

        async function refresh() {
            const requests = await (await fetch('/api/requests')).json();
            if (requests.length === 0) {
                list.innerHTML = '<div class="empty">Waiting for requests...</div>';
                return;
            }
            list.innerHTML = requests.map(r => `
                <div class="row ${r.id === selected ? 'selected' : ''}" data-id="${r.id}">
                    <span class="status-${r.status}">${r.responseStatus ?? '...'}</span>
                    <span class="url">${escape(r.url)}${r.tags.map(t =>
                        `<span class="tag" style="background:${escape(t.color)}">${escape(t.name)}</span>`).join('')}</span>
                    <span>${escape(r.capabilities)}</span>
                    <span>${formatTiming(r.timing)}</span>
                </div>`).join('');
        }

        async function select(id) {
            selected = id;
            const selection = await (await fetch(`/api/requests/${id}/select`, { method: 'POST' })).json();
            const response = selection.response.state === 'ready' ? selection.response.message : null;
            detail.innerHTML = `
                <h3>Request</h3><pre>${escape(JSON.stringify(selection.requestMessage, null, 2))}</pre>
                <h3>Response</h3><pre>${response ? escape(JSON.stringify(response, null, 2)) : 'Loading...'}</pre>
                <p><a href="/api/requests/${id}/car/request">Download request CAR</a></p>`;
            refresh();
        }

        async function saveFilter() {
            const criteria = await (await fetch('/api/filter')).json();
            criteria.urlSearch = document.getElementById('url').value;
            criteria.capabilitySearch = document.getElementById('capability').value;
            criteria.status = document.getElementById('status').value;
            await fetch('/api/filter', {
                method: 'PUT',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify(criteria),
            });
            refresh();
        }

        list.addEventListener('click', e => {
            const row = e.target.closest('.row');
            if (row) select(Number(row.dataset.id));
        });
        ['url', 'capability', 'status'].forEach(id =>
            document.getElementById(id).addEventListener('input', saveFilter));
        document.getElementById('clear').addEventListener('click', () =>
            fetch('/api/capture/clear', { method: 'POST' }));

        fetch('/api/filter').then(r => r.json()).then(criteria => {
            document.getElementById('url').value = criteria.urlSearch;
            document.getElementById('capability').value = criteria.capabilitySearch;
            document.getElementById('status').value = criteria.status;
        });

        const ws = new WebSocket(`ws://${location.host}/ws`);
        ws.onmessage = event => {
            const message = JSON.parse(event.data);
            if (message.type === 'reset') {
                selected = null;
                detail.innerHTML = '<div class="empty">Select a request</div>';
            }
            refresh();
        };
    </script>
</body>
</html>
"#;
